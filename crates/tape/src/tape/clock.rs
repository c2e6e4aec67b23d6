/// Advisory timestep clock.
///
/// The tape stamps each equation with the current timestep and asks
/// functionals for their dependencies timestep by timestep. Nothing else
/// depends on it, so a host that never touches the clock records everything
/// at timestep zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clock {
    timestep: usize,
    times: Vec<Option<f64>>,
    finished: bool,
}

impl Clock {
    /// Records the start time of timestep zero.
    pub fn start(&mut self, t0: f64) {
        match self.times.first_mut() {
            Some(time) => *time = Some(t0),
            None => self.times.push(Some(t0)),
        }
    }

    /// Advances to the next timestep, optionally recording its start time.
    pub fn next(&mut self, time: Option<f64>) {
        if self.times.is_empty() {
            self.times.push(None);
        }
        self.timestep += 1;
        self.times.push(time);
    }

    /// Marks the last timestep as complete.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    #[must_use]
    pub fn timestep(&self) -> usize {
        self.timestep
    }

    /// Returns the recorded start time of `timestep`.
    #[must_use]
    pub fn time(&self, timestep: usize) -> Option<f64> {
        self.times.get(timestep).copied().flatten()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
