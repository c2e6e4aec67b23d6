/// Watches a replay equation by equation.
///
/// A replay hands each event (typically the index and value of the equation
/// it just re-ran) to its observer. Returning `Some(action)` asks the replay
/// to act on it, for example to stop; `None` moves on to the next equation.
///
/// Any `FnMut(&E) -> Option<A>` closure is an observer, so a closure that
/// pushes into a borrowed `Vec` is enough to collect a trace. `()` watches
/// nothing.
pub trait Observer<E, A> {
    fn observe(&mut self, event: &E) -> Option<A>;
}

impl<E, A, F> Observer<E, A> for F
where
    F: FnMut(&E) -> Option<A>,
{
    fn observe(&mut self, event: &E) -> Option<A> {
        self(event)
    }
}

impl<E, A> Observer<E, A> for () {
    fn observe(&mut self, _event: &E) -> Option<A> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Solved {
        index: usize,
        norm: f64,
    }

    /// Re-runs `norms.len()` equations and returns how many ran.
    fn replay<O: Observer<Solved, ()>>(mut observer: O, norms: &[f64]) -> usize {
        let mut ran = 0;
        for (index, &norm) in norms.iter().enumerate() {
            ran += 1;
            if observer.observe(&Solved { index, norm }).is_some() {
                break;
            }
        }
        ran
    }

    #[test]
    fn closure_stops_on_a_blown_up_value() {
        let norms = [1.0, 2.0, f64::INFINITY, 3.0];
        let ran = replay(|event: &Solved| (!event.norm.is_finite()).then_some(()), &norms);
        assert_eq!(ran, 3);
    }

    #[test]
    fn unit_watches_the_whole_log() {
        assert_eq!(replay((), &[0.5; 6]), 6);
    }

    #[test]
    fn closure_collects_a_trace() {
        let mut seen = Vec::new();
        let ran = replay(
            |event: &Solved| {
                seen.push(event.index);
                None::<()>
            },
            &[1.0, 1.0, 1.0],
        );
        assert_eq!(ran, 3);
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
