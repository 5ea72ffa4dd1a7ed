/// A simulation clock that tracks fixed-duration steps.
///
/// The `Clock` hands out step indices and converts them to elapsed time.
///
/// # Examples
///
/// ```
/// use bess_thermal_sim::sim::clock::Clock;
///
/// let mut clock = Clock::new(3, 60.0);
/// let mut steps = Vec::new();
///
/// clock.run(|step| steps.push(step));
/// assert_eq!(steps, vec![0, 1, 2]);
/// assert_eq!(clock.elapsed_s(), 180.0);
/// ```
#[derive(Debug, Clone)]
pub struct Clock {
    /// Next step to hand out
    current: usize,
    /// Total steps to run
    total: usize,
    /// Step duration in seconds
    dt_s: f64,
}

impl Clock {
    /// Creates a clock.
    ///
    /// # Arguments
    ///
    /// * `total` - The total number of steps the clock will run
    /// * `dt_s` - Duration of one step in seconds
    pub fn new(total: usize, dt_s: f64) -> Self {
        Self {
            current: 0,
            total,
            dt_s,
        }
    }

    /// Advances the clock by one step.
    ///
    /// # Returns
    ///
    /// * `Some(step)` - The step number (starting from 0) before advancing
    /// * `None` - If the clock has reached its total steps
    pub fn tick(&mut self) -> Option<usize> {
        if self.current < self.total {
            let step = self.current;
            self.current += 1;
            Some(step)
        } else {
            None
        }
    }

    /// Runs a function for each remaining step.
    pub fn run(&mut self, mut f: impl FnMut(usize)) {
        while let Some(step) = self.tick() {
            f(step);
        }
    }

    /// Time covered by the steps handed out so far.
    pub fn elapsed_s(&self) -> f64 {
        self.current as f64 * self.dt_s
    }

    pub fn dt_s(&self) -> f64 {
        self.dt_s
    }

    pub fn remaining(&self) -> usize {
        self.total - self.current
    }
}
