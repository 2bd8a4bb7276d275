//! Test descriptors and the fixed plan they're run in.

use tapdance_custodian::Custodian;

/// A test body: receives the root custodian for its own process and returns
/// a status (0 = pass, non-zero = fail). Runs entirely inside the forked
/// child — nothing it does is observable by the parent except through its
/// return value, its exit/signal status, and whatever it writes to the
/// capture file.
pub type TestBody = fn(&mut Custodian) -> i32;

/// One registered test: a display name used verbatim in TAP output, and the
/// body to run. Immutable once built.
#[derive(Clone, Copy)]
pub struct TestDescriptor {
    display: &'static str,
    body: TestBody,
}

impl TestDescriptor {
    pub fn new(display: &'static str, body: TestBody) -> Self {
        Self { display, body }
    }

    pub fn display(&self) -> &'static str {
        self.display
    }

    pub fn body(&self) -> TestBody {
        self.body
    }
}

/// An ordered, 1-indexed sequence of descriptors, fixed before the first
/// test runs.
#[derive(Clone, Default)]
pub struct TestPlan {
    descriptors: Vec<TestDescriptor>,
}

impl TestPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, descriptor: TestDescriptor) -> &mut Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Number of descriptors in the plan — emitted as `1..N`.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptors paired with their 1-based index, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &TestDescriptor)> {
        self.descriptors.iter().enumerate().map(|(i, d)| (i + 1, d))
    }
}

impl FromIterator<TestDescriptor> for TestPlan {
    fn from_iter<I: IntoIterator<Item = TestDescriptor>>(iter: I) -> Self {
        Self {
            descriptors: iter.into_iter().collect(),
        }
    }
}
