//! Per-test log capture.
//!
//! Tests run in parallel in one process, so a global subscriber would interleave their output.
//! Each test run through [`test_with_logging`] logs into its own buffer instead, which is printed
//! in one piece when the test ends.
use crate::Result;
use std::{
    cell::RefCell,
    future::Future,
    io::Write,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{dispatcher::DefaultGuard, Dispatch};
use tracing_subscriber::fmt::MakeWriter;

/// Filter used when `RUST_LOG` isn't set.  The AWS SDK and HTTP stacks are very chatty at debug.
const DEFAULT_FILTER: &str = "h2=warn,hyper=info,rustls=info,aws=info,reqwest=info,debug";

/// How long to wait at the end of a test for blocking tasks it left behind
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

thread_local! {
    static BLOCKING_THREAD_DISPATCH: RefCell<Option<DefaultGuard>> = const { RefCell::new(None) };
}

/// Log output of a single test
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    /// A dispatcher that formats every event into this buffer
    fn dispatch(&self) -> Result<Dispatch> {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{fmt, EnvFilter};

        let filter =
            EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

        // Thread IDs tell events from the test's own thread apart from those on the blocking pool
        let format = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(self.clone());

        Ok(Dispatch::new(
            tracing_subscriber::registry().with(filter).with(format),
        ))
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for &LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = &'a Self;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

/// A current-thread runtime whose blocking pool logs to `dispatch`.
///
/// The test future and every task it spawns are polled on the calling thread, which already has
/// `dispatch` as its default.  Blocking pool threads (Terraform commands run there) start with
/// no default of their own, so each one gets `dispatch` installed for its lifetime.
fn runtime(dispatch: &Dispatch) -> Result<tokio::runtime::Runtime> {
    let dispatch = dispatch.clone();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .on_thread_start(move || {
            let guard = tracing::dispatcher::set_default(&dispatch);
            BLOCKING_THREAD_DISPATCH.with(|cell| *cell.borrow_mut() = Some(guard));
        })
        .on_thread_stop(|| {
            let guard = BLOCKING_THREAD_DISPATCH.with(|cell| cell.borrow_mut().take());
            drop(guard);
        })
        .build()?;

    Ok(runtime)
}

/// Run an async test on its own runtime, with its own logging.
///
/// Use this instead of `#[tokio::test]`.  The test's log is printed once it returns or panics; a
/// panic is re-raised after that.
pub fn test_with_logging(test: impl Future<Output = Result<()>>) -> Result<()> {
    let log = LogBuffer::default();
    let dispatch = log.dispatch()?;
    let runtime = runtime(&dispatch)?;

    // Neither the runtime nor the test future is used again after a panic
    let result = tracing::dispatcher::with_default(&dispatch, move || {
        std::panic::catch_unwind(AssertUnwindSafe(move || {
            let result = runtime.block_on(test);
            runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);

            result
        }))
    });

    println!("Log events from this test:\n{}", log.contents());

    result.unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}
