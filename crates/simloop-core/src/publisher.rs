use crate::actuator::Observation;
use crate::command_buffer::CommandFrame;
use crate::error::PublishError;
use std::time::Duration;

/// Everything a status sink may report about one published instant.
#[derive(Debug, Clone, Copy)]
pub struct StatusFrame<'a> {
    pub sim_time: Duration,
    pub unix_us: u64,
    pub observed: &'a Observation,
    /// The commands that produced `observed`.
    pub commanded: &'a CommandFrame,
}

/// Telemetry sink. Best effort: failures are logged by the loop and
/// stepping carries on.
pub trait StatusPublisher: Send {
    fn publish(&mut self, status: &StatusFrame<'_>) -> Result<(), PublishError>;

    fn close(&mut self) {}
}

impl<P: StatusPublisher + ?Sized> StatusPublisher for Box<P> {
    fn publish(&mut self, status: &StatusFrame<'_>) -> Result<(), PublishError> {
        (**self).publish(status)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Fans one status out to several sinks. A failing sink does not starve
/// the ones after it; the first error is returned.
#[derive(Default)]
pub struct PublisherSet {
    sinks: Vec<Box<dyn StatusPublisher>>,
}

impl PublisherSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl StatusPublisher + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl StatusPublisher for PublisherSet {
    fn publish(&mut self, status: &StatusFrame<'_>) -> Result<(), PublishError> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.publish(status) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn close(&mut self) {
        for sink in &mut self.sinks {
            sink.close();
        }
    }
}

/// Discards every status.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl StatusPublisher for NullPublisher {
    fn publish(&mut self, _status: &StatusFrame<'_>) -> Result<(), PublishError> {
        Ok(())
    }
}
