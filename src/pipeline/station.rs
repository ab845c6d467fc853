//! Core station abstraction and runner for the conversation pipeline.

use crate::pipeline::error::{ErrorReporter, StationError};
use crossbeam_channel::{Receiver, Sender};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Downstream side of a station.
///
/// A station may emit any number of items per input. Once the downstream
/// receiver is gone the outlet reports itself closed and the runner stops.
pub struct Outlet<T> {
    tx: Sender<T>,
    closed: bool,
}

impl<T> Outlet<T> {
    pub fn new(tx: Sender<T>) -> Self {
        Self { tx, closed: false }
    }

    /// Sends one item downstream. Returns false when downstream has hung up.
    pub fn emit(&mut self, item: T) -> bool {
        if !self.closed && self.tx.send(item).is_err() {
            self.closed = true;
        }
        !self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// A processing station in the pipeline.
///
/// Each station receives input, processes it, and emits zero or more
/// outputs. Stations run in their own threads and are connected by channels.
pub trait Station: Send + 'static {
    /// The input type this station receives.
    type Input: Send + 'static;
    /// The output type this station produces.
    type Output: Send + 'static;

    /// Processes a single input item, emitting results through `out`.
    fn process(
        &mut self,
        input: Self::Input,
        out: &mut Outlet<Self::Output>,
    ) -> Result<(), StationError>;

    /// Returns the name of this station for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Called when the station is shutting down.
    fn shutdown(&mut self) {}
}

/// Runs a station in a dedicated thread.
pub struct StationRunner<S: Station> {
    handle: Option<JoinHandle<()>>,
    station_name: &'static str,
    _phantom: PhantomData<S>,
}

impl<S: Station> StationRunner<S> {
    /// Spawns a station that handles one input at a time.
    pub fn spawn(
        station: S,
        input_rx: Receiver<S::Input>,
        outlet: Outlet<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self::spawn_loop(station, outlet, error_reporter, move || input_rx.recv().ok())
    }

    /// Spawns a station that receives everything queued at once.
    ///
    /// Blocks for the first item, then takes whatever else is already
    /// waiting, so a burst of inputs is handled as one batch.
    pub fn spawn_batched<T>(
        station: S,
        input_rx: Receiver<T>,
        outlet: Outlet<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Self
    where
        T: Send + 'static,
        S: Station<Input = Vec<T>>,
    {
        Self::spawn_loop(station, outlet, error_reporter, move || {
            let first = input_rx.recv().ok()?;
            let mut batch = vec![first];
            batch.extend(input_rx.try_iter());
            Some(batch)
        })
    }

    fn spawn_loop<F>(
        mut station: S,
        mut outlet: Outlet<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
        mut next: F,
    ) -> Self
    where
        F: FnMut() -> Option<S::Input> + Send + 'static,
    {
        let station_name = station.name();

        let handle = thread::Builder::new()
            .name(station_name.to_string())
            .spawn(move || {
                while let Some(input) = next() {
                    match station.process(input, &mut outlet) {
                        Ok(()) => {}
                        Err(error @ StationError::Recoverable(_)) => {
                            error_reporter.report(station_name, &error);
                        }
                        Err(error @ StationError::Fatal(_)) => {
                            error_reporter.report(station_name, &error);
                            break;
                        }
                    }
                    if outlet.is_closed() {
                        tracing::debug!(station = station_name, "downstream closed");
                        break;
                    }
                }
                station.shutdown();
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                error_reporter.report(
                    station_name,
                    &StationError::Fatal(format!("failed to spawn thread: {e}")),
                );
                None
            }
        };

        Self {
            handle,
            station_name,
            _phantom: PhantomData,
        }
    }

    /// Waits for the station thread to complete.
    pub fn join(mut self) -> Result<(), String> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| format!("Station '{}' thread panicked", self.station_name))
        } else {
            Ok(())
        }
    }

    /// Returns the name of the station.
    pub fn name(&self) -> &'static str {
        self.station_name
    }

    /// Moves the join into a wrapper thread so the runner can be collected
    /// alongside plain thread handles.
    pub fn into_thread(self) -> Option<JoinHandle<()>> {
        let station = self.name();
        thread::Builder::new()
            .name(format!("{station}-join"))
            .spawn(move || {
                if let Err(msg) = self.join() {
                    tracing::error!("{msg}");
                }
            })
            .map_err(|e| tracing::error!(station, "cannot watch station thread, detaching it: {e}"))
            .ok()
    }
}
