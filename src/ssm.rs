use futures::future::BoxFuture;

use crate::error::FpError;

/// What a single numbered state decided after running its action.
pub enum StepOutcome {
    /// Advance to `current + 1`.
    Next,
    /// Jump directly to an arbitrary state index.
    JumpTo(usize),
    /// The machine is done; its parent (if any) should advance.
    Complete,
    /// The machine failed; its parent (if any) should abort with the same
    /// error.
    Abort(FpError),
}

impl StepOutcome {
    /// Collapses a single register-helper outcome into a plain result, for
    /// call sites that drive one step inline instead of through a literal
    /// state table.
    pub fn into_result(self) -> Result<(), FpError> {
        match self {
            StepOutcome::Next => Ok(()),
            StepOutcome::Abort(e) => Err(e),
            StepOutcome::JumpTo(_) | StepOutcome::Complete => {
                unreachable!("register step helpers only ever return Next or Abort")
            }
        }
    }
}

type Action<Ctx> = Box<dyn for<'a> Fn(&'a mut Ctx) -> BoxFuture<'a, StepOutcome>>;

/// A sequential state machine: a flat list of numbered states, each an
/// async action closure over some shared context `Ctx`. Suspension at a
/// pending USB transfer or timer is expressed as a plain `.await` inside
/// the action, rather than as an explicit "waiting" state.
pub struct Ssm<Ctx> {
    name: &'static str,
    states: Vec<Action<Ctx>>,
}

impl<Ctx> Ssm<Ctx> {
    pub fn new(name: &'static str, states: Vec<Action<Ctx>>) -> Self {
        Ssm { name, states }
    }

    /// Runs from state 0 until a state reports `Complete` or `Abort`.
    /// Nested SSMs are driven by awaiting their own `run` from inside a
    /// parent state's action and mapping `Ok(())` to `Next` and `Err(e)`
    /// to `Abort(e)`.
    pub async fn run(&self, ctx: &mut Ctx) -> Result<(), FpError> {
        let mut state = 0usize;
        loop {
            let action = self.states.get(state).ok_or_else(|| {
                FpError::protocol(format!(
                    "{}: state {} out of range ({} states)",
                    self.name,
                    state,
                    self.states.len()
                ))
            })?;
            match action(ctx).await {
                StepOutcome::Next => state += 1,
                StepOutcome::JumpTo(next) => state = next,
                StepOutcome::Complete => return Ok(()),
                StepOutcome::Abort(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        hits: Vec<usize>,
    }

    fn step(ix: usize) -> Action<Counter> {
        Box::new(move |ctx: &mut Counter| {
            Box::pin(async move {
                ctx.hits.push(ix);
                if ix == 2 {
                    StepOutcome::JumpTo(4)
                } else if ix == 4 {
                    StepOutcome::Complete
                } else {
                    StepOutcome::Next
                }
            })
        })
    }

    #[tokio::test]
    async fn jump_to_skips_intermediate_states() {
        let machine = Ssm::new(
            "test",
            vec![step(0), step(1), step(2), step(3), step(4)],
        );
        let mut ctx = Counter { hits: vec![] };
        machine.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.hits, vec![0, 1, 2, 4]);
    }

    #[tokio::test]
    async fn abort_propagates_error() {
        let machine: Ssm<Counter> = Ssm::new(
            "test",
            vec![Box::new(|_ctx: &mut Counter| {
                Box::pin(async move { StepOutcome::Abort(FpError::NoDev) })
            })],
        );
        let mut ctx = Counter { hits: vec![] };
        let err = machine.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, FpError::NoDev));
    }

    #[tokio::test]
    async fn out_of_range_state_is_a_protocol_error() {
        let machine: Ssm<Counter> = Ssm::new(
            "test",
            vec![Box::new(|_ctx: &mut Counter| {
                Box::pin(async move { StepOutcome::JumpTo(5) })
            })],
        );
        let mut ctx = Counter { hits: vec![] };
        let err = machine.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, FpError::Protocol(_)));
    }
}
