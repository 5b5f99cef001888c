//! Binding teardowns to the lifetime of a test.
//!
//! A test owns a [`TestHandle`]. Everything provisioned for it registers a [`Teardown`] there,
//! and the handle runs them exactly once, last registered first, when the test finishes.
//! [`TestContext`] is the handle used with libtest. [`TestContext::run`] runs a test body and
//! then its teardowns, also when the body panics. A context used directly runs its teardowns on
//! [`TestContext::finish`] or, failing that, when it is dropped on a multi-thread runtime.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::runtime::{Builder, Handle, RuntimeFlavor};
use tracing::{debug, error};

use crate::error::{ErrorKind, IsolationResult};
use crate::isolation_error;

/// Name used when the current thread carries no test name.
pub const UNNAMED_TEST: &str = "unnamed-test";

/// A queued cleanup action, run at most once.
pub struct Teardown {
    label: String,
    action: Box<dyn FnOnce() -> BoxFuture<'static, IsolationResult<()>> + Send>,
}

impl Teardown {
    /// Creates a teardown that runs `action` when the owning test finishes.
    ///
    /// `label` identifies the released resource in logs and errors.
    pub fn new<F, Fut>(label: impl Into<String>, action: F) -> Teardown
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = IsolationResult<()>> + Send + 'static,
    {
        Teardown {
            label: label.into(),
            action: Box::new(move || action().boxed()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Consumes the teardown and runs its action.
    pub async fn run(self) -> IsolationResult<()> {
        let Teardown { label, action } = self;

        action().await?;
        debug!(teardown = %label, "teardown finished");

        Ok(())
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// The callback surface of a running test.
#[async_trait]
pub trait TestHandle: Send + Sync {
    /// Returns the name of the test, used as the seed of generated identifiers.
    fn name(&self) -> &str;

    /// Queues `teardown` to run once the test has finished.
    ///
    /// A handle that can no longer accept teardowns must still run `teardown` before returning
    /// an error, so that nothing provisioned for the test is leaked.
    async fn register(&self, teardown: Teardown) -> IsolationResult<()>;
}

#[derive(Default)]
struct Registry {
    teardowns: Vec<Teardown>,
    children: Vec<Weak<Mutex<Registry>>>,
    finished: bool,
}

impl Registry {
    /// Marks the registry finished and returns every pending teardown in run order.
    ///
    /// Teardowns of subtests come first, most recent subtest first.
    fn drain(&mut self) -> Vec<Teardown> {
        self.finished = true;

        let mut pending = Vec::new();
        for child in self.children.drain(..).rev() {
            if let Some(child) = child.upgrade() {
                pending.extend(lock(&child).drain());
            }
        }
        pending.extend(self.teardowns.drain(..).rev());

        pending
    }

    /// Labels of the teardowns [`Registry::drain`] would return, in the same order.
    fn pending_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        for child in self.children.iter().rev() {
            if let Some(child) = child.upgrade() {
                labels.extend(lock(&child).pending_labels());
            }
        }
        labels.extend(self.teardowns.iter().rev().map(|teardown| teardown.label.clone()));

        labels
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    // A teardown never runs under the lock, so a poisoned registry is still consistent.
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [`TestHandle`] for libtest tests.
///
/// ```ignore
/// #[tokio::test]
/// async fn test_creates_a_user() {
///     TestContext::run_current(async |ctx| {
///         let database = TestDatabase::clone_from_template(ctx).await.unwrap();
///         // ...
///     })
///     .await;
/// }
/// ```
pub struct TestContext {
    name: String,
    registry: Arc<Mutex<Registry>>,
}

impl TestContext {
    pub fn new(name: impl Into<String>) -> TestContext {
        TestContext {
            name: name.into(),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Creates a context named after the running test.
    ///
    /// libtest names each test thread after its test. Outside of libtest the name falls back to
    /// [`UNNAMED_TEST`].
    pub fn current() -> TestContext {
        let name = std::thread::current()
            .name()
            .filter(|name| *name != "main")
            .unwrap_or(UNNAMED_TEST)
            .to_owned();

        TestContext::new(name)
    }

    /// Runs `body` with a new context named `name`, then runs the context's teardowns.
    ///
    /// The teardowns run even if `body` panics, on any runtime flavor, and the panic is resumed
    /// afterwards. A teardown failure after a successful body panics with the teardown error.
    pub async fn run<F, T>(name: &str, body: F) -> T
    where
        F: AsyncFnOnce(&TestContext) -> T,
    {
        TestContext::new(name).run_to_end(body).await
    }

    /// Same as [`TestContext::run`], with the context named after the running test.
    pub async fn run_current<F, T>(body: F) -> T
    where
        F: AsyncFnOnce(&TestContext) -> T,
    {
        TestContext::current().run_to_end(body).await
    }

    async fn run_to_end<F, T>(self, body: F) -> T
    where
        F: AsyncFnOnce(&TestContext) -> T,
    {
        let outcome = AssertUnwindSafe(body(&self)).catch_unwind().await;
        let finished = self.finish().await;

        match (outcome, finished) {
            (Ok(value), Ok(())) => value,
            (Ok(_), Err(err)) => panic!("teardown failed for test {}: {err}", self.name),
            (Err(payload), finished) => {
                if let Err(err) = finished {
                    error!(
                        test = %self.name,
                        error = %err,
                        "teardown failed while the test was panicking"
                    );
                }
                panic::resume_unwind(payload)
            }
        }
    }

    /// Creates a child context named `parent/name`.
    ///
    /// The child runs its own teardowns when it finishes or is dropped. If the parent finishes
    /// first, the child's pending teardowns run before the parent's.
    pub fn subtest(&self, name: &str) -> TestContext {
        let child = TestContext::new(format!("{}/{name}", self.name));
        lock(&self.registry)
            .children
            .push(Arc::downgrade(&child.registry));

        child
    }

    /// Returns `true` once the teardowns have been run.
    pub fn is_finished(&self) -> bool {
        lock(&self.registry).finished
    }

    /// Runs every registered teardown exactly once, last registered first.
    ///
    /// Every teardown is attempted even if an earlier one fails. Failures are returned
    /// together.
    pub async fn finish(&self) -> IsolationResult<()> {
        let pending = lock(&self.registry).drain();

        run_all(&self.name, pending).await
    }
}

async fn run_all(test: &str, pending: Vec<Teardown>) -> IsolationResult<()> {
    let mut errors = Vec::new();
    for teardown in pending {
        let label = teardown.label().to_owned();
        if let Err(err) = teardown.run().await {
            debug!(test, teardown = %label, error = %err, "teardown failed");
            errors.push(err);
        }
    }

    if errors.is_empty() {
        return Ok(());
    }

    Err(errors.into())
}

#[async_trait]
impl TestHandle for TestContext {
    fn name(&self) -> &str {
        &self.name
    }

    async fn register(&self, teardown: Teardown) -> IsolationResult<()> {
        let rejected = {
            let mut registry = lock(&self.registry);
            if registry.finished {
                Some(teardown)
            } else {
                registry.teardowns.push(teardown);
                None
            }
        };

        let Some(teardown) = rejected else {
            return Ok(());
        };

        let mut errors = vec![isolation_error!(
            ErrorKind::InvalidState,
            "Teardown registered after the test finished",
            format!("test {}, teardown {}", self.name, teardown.label())
        )];
        if let Err(err) = teardown.run().await {
            errors.push(err);
        }

        Err(errors.into())
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let blocking = Blocking::current();

        let result = if let Blocking::Unavailable = blocking {
            // The teardowns stay queued, they cannot run without blocking this runtime.
            let leaked = lock(&self.registry).pending_labels();
            if leaked.is_empty() {
                return;
            }

            Err(isolation_error!(
                ErrorKind::InvalidState,
                "Teardowns cannot run on drop inside a current-thread runtime",
                format!(
                    "leaked {}; use TestContext::run or await TestContext::finish",
                    leaked.join(", ")
                )
            ))
        } else {
            let pending = lock(&self.registry).drain();
            if pending.is_empty() {
                return;
            }

            blocking.block_on(run_all(&self.name, pending))
        };

        if let Err(err) = result {
            if std::thread::panicking() {
                error!(
                    test = %self.name,
                    error = %err,
                    "teardown failed while the test was panicking"
                );
            } else {
                panic!("teardown failed for test {}: {err}", self.name);
            }
        }
    }
}

/// How synchronous code can drive teardowns to completion.
enum Blocking {
    /// Inside a multi-thread runtime, by blocking the current worker in place.
    InPlace(Handle),
    /// Outside of any runtime, on a fresh current-thread runtime.
    FreshRuntime,
    /// Inside a current-thread runtime, which would deadlock.
    Unavailable,
}

impl Blocking {
    fn current() -> Blocking {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                Blocking::InPlace(handle)
            }
            Ok(_) => Blocking::Unavailable,
            Err(_) => Blocking::FreshRuntime,
        }
    }

    fn block_on<F>(self, future: F) -> IsolationResult<()>
    where
        F: Future<Output = IsolationResult<()>>,
    {
        match self {
            Blocking::InPlace(handle) => {
                tokio::task::block_in_place(move || handle.block_on(future))
            }
            Blocking::FreshRuntime => {
                let runtime = Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|err| {
                        isolation_error!(
                            ErrorKind::InvalidState,
                            "Runtime for teardowns could not be built",
                            source: err
                        )
                    })?;

                runtime.block_on(future)
            }
            Blocking::Unavailable => Err(isolation_error!(
                ErrorKind::InvalidState,
                "Teardowns cannot run on drop inside a current-thread runtime"
            )),
        }
    }
}
