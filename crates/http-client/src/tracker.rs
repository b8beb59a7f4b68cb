use parking_lot::Mutex;

/// Outcome of recording one non-JSON response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NonJsonRun {
    /// Still below the threshold; carries the current run length.
    Below(u32),

    /// The run reached the threshold and the counter was reset.
    Tripped(u32),
}

/// Counts consecutive non-JSON responses from one upstream.
///
/// A lone HTML page is noise. A run of them usually means a load balancer is
/// serving its own error page, so once the run reaches `threshold` the
/// tracker reports [`NonJsonRun::Tripped`] and starts over.
#[derive(Debug)]
pub struct NonJsonTracker {
    threshold: u32,
    consecutive: Mutex<u32>,
}

impl NonJsonTracker {
    /// Creates a tracker that trips after `threshold` consecutive responses.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: Mutex::new(0),
        }
    }

    /// Records a non-JSON response.
    pub fn record_non_json(&self) -> NonJsonRun {
        let mut consecutive = self.consecutive.lock();
        *consecutive += 1;

        if *consecutive >= self.threshold {
            *consecutive = 0;
            NonJsonRun::Tripped(self.threshold)
        } else {
            NonJsonRun::Below(*consecutive)
        }
    }

    /// Records a JSON response, ending any run.
    pub fn reset(&self) {
        *self.consecutive.lock() = 0;
    }

    /// Current run length.
    #[must_use]
    pub fn consecutive(&self) -> u32 {
        *self.consecutive.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_on_fifth_and_resets() {
        let tracker = NonJsonTracker::new(5);

        for expected in 1..5 {
            assert_eq!(tracker.record_non_json(), NonJsonRun::Below(expected));
        }
        assert_eq!(tracker.record_non_json(), NonJsonRun::Tripped(5));
        assert_eq!(tracker.consecutive(), 0);

        assert_eq!(tracker.record_non_json(), NonJsonRun::Below(1));
    }

    #[test]
    fn test_json_resets_run() {
        let tracker = NonJsonTracker::new(5);

        tracker.record_non_json();
        tracker.record_non_json();
        tracker.record_non_json();
        tracker.reset();

        assert_eq!(tracker.consecutive(), 0);
        assert_eq!(tracker.record_non_json(), NonJsonRun::Below(1));
    }
}
