use std::thread::JoinHandle;

pub mod cli;
pub mod util;

/// A chip model that advances in discrete poll iterations.
pub trait Engine {
    type Io;
    type Error: std::error::Error + Send + 'static;

    fn name(&self) -> &'static str;

    /// Run one poll iteration against `io`.
    fn tick(&mut self, io: &mut Self::Io) -> Result<(), Self::Error>;
}

/// Tick `engine` until it fails or `limit` ticks have run. Returns the number of ticks run.
pub fn run<E: Engine>(engine: &mut E, io: &mut E::Io, limit: Option<u64>) -> Result<u64, E::Error> {
    let mut ticks = 0;
    while limit.map_or(true, |limit| ticks < limit) {
        engine.tick(io)?;
        ticks += 1;
    }
    Ok(ticks)
}

/// Everything a finished engine thread hands back.
pub struct Finished<E: Engine> {
    pub engine: E,
    pub io: E::Io,
    pub result: Result<u64, E::Error>,
}

/// Runs an engine and its port driver on their own thread
///
/// Both are moved onto the thread and handed back by [`ThreadAdapter::join`], so the caller can
/// inspect the final state without sharing anything while the engine runs.
pub struct ThreadAdapter<E: Engine> {
    name: &'static str,
    join: JoinHandle<Finished<E>>,
}

impl<E> ThreadAdapter<E>
where
    E: Engine + Send + 'static,
    E::Io: Send + 'static,
{
    pub fn spawn(mut engine: E, mut io: E::Io, limit: Option<u64>) -> Result<Self, anyhow::Error> {
        let name = engine.name();
        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let result = run(&mut engine, &mut io, limit);
                if let Err(e) = &result {
                    tracing::debug!("{} stopped: {}", engine.name(), e);
                }
                Finished { engine, io, result }
            })?;

        Ok(Self { name, join })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn join(self) -> Result<Finished<E>, anyhow::Error> {
        self.join
            .join()
            .map_err(|_| anyhow::anyhow!("{} thread panicked", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Overflow;

    impl std::fmt::Display for Overflow {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "counter overflow")
        }
    }

    impl std::error::Error for Overflow {}

    struct Counter {
        max: u32,
    }

    impl Engine for Counter {
        type Io = Vec<u32>;
        type Error = Overflow;

        fn name(&self) -> &'static str {
            "counter"
        }

        fn tick(&mut self, io: &mut Vec<u32>) -> Result<(), Overflow> {
            let next = io.last().map_or(0, |n| n + 1);
            if next > self.max {
                return Err(Overflow);
            }
            io.push(next);
            Ok(())
        }
    }

    #[test]
    fn run_stops_at_limit() {
        let mut io = Vec::new();
        assert_eq!(run(&mut Counter { max: 100 }, &mut io, Some(5)).ok(), Some(5));
        assert_eq!(io, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn thread_hands_back_engine_and_error() {
        let adapter = ThreadAdapter::spawn(Counter { max: 3 }, Vec::new(), None).unwrap();
        assert_eq!(adapter.name(), "counter");
        let finished = adapter.join().unwrap();
        assert!(finished.result.is_err());
        assert_eq!(finished.io, vec![0, 1, 2, 3]);
        assert_eq!(finished.engine.max, 3);
    }
}
