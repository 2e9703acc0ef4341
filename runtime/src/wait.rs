use std::time::{Duration, Instant};

/// Poll `done` until it holds or `ceiling` elapses, calling `pump` between
/// polls so the live instance can make progress.
///
/// Both callbacks get `state`, usually the host. Returns whether `done` held.
/// Running out of time is not an error: outstanding work is left for the next
/// refresh.
pub fn poll_until<S: ?Sized>(
    ceiling: Duration,
    interval: Duration,
    state: &mut S,
    mut done: impl FnMut(&mut S) -> bool,
    mut pump: impl FnMut(&mut S),
) -> bool {
    let start = Instant::now();
    loop {
        if done(state) {
            return true;
        }
        if start.elapsed() >= ceiling {
            return false;
        }
        pump(state);
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        polls: usize,
        pumps: usize,
    }

    #[test]
    fn returns_once_done() {
        let mut counter = Counter::default();
        let done = poll_until(
            Duration::from_secs(5),
            Duration::ZERO,
            &mut counter,
            |c| {
                c.polls += 1;
                c.polls == 3
            },
            |c| c.pumps += 1,
        );
        assert!(done);
        assert_eq!(counter.pumps, 2);
    }

    #[test]
    fn gives_up_at_ceiling() {
        let start = Instant::now();
        let done = poll_until(
            Duration::from_millis(30),
            Duration::from_millis(1),
            &mut (),
            |_| false,
            |_| {},
        );
        assert!(!done);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn already_done_never_pumps() {
        let mut counter = Counter::default();
        assert!(poll_until(
            Duration::ZERO,
            Duration::ZERO,
            &mut counter,
            |_| true,
            |c| c.pumps += 1,
        ));
        assert_eq!(counter.pumps, 0);
    }
}
