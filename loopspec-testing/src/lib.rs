//! Internal testing utilities for the loopspec crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

/// Run a table of test cases, reporting every failing case at once.
///
/// Define a `Case` struct holding the inputs and expected results of one
/// test, build a collection of them named `cases` and call
/// `cases.test_each(|case| ...)`. Panics from individual cases are caught so
/// that one bad case does not hide the others. Once all cases have run, the
/// call panics if any failed, printing their debug representations.
///
/// ```
/// use loopspec_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case {
///     in_size: usize,
///     kernel: usize,
///     expected: usize,
/// }
///
/// let cases = [
///     Case { in_size: 32, kernel: 3, expected: 30 },
///     Case { in_size: 7, kernel: 7, expected: 1 },
/// ];
///
/// cases.test_each(|case| {
///     assert_eq!(case.in_size - case.kernel + 1, case.expected);
/// });
/// ```
///
/// Cases and captured values must be unwind safe. Where a field is not (eg.
/// it holds a `Cell`), store a recipe for the value in the case and build it
/// inside the test closure instead.
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Call `test` with a reference to each case.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Call `test` with an owned clone of each case.
    fn test_each_clone(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe;
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        I::Item: Debug + RefUnwindSafe,
    {
        let failures: Vec<_> = self
            .into_iter()
            .filter(|case| std::panic::catch_unwind(|| test(case)).is_err())
            .collect();
        report_failures(&failures);
    }

    fn test_each_clone(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        I::Item: Debug + Clone + UnwindSafe,
    {
        let failures: Vec<_> = self
            .into_iter()
            .filter(|case| {
                let value = case.clone();
                let test = &test;
                std::panic::catch_unwind(move || test(value)).is_err()
            })
            .collect();
        report_failures(&failures);
    }
}

fn report_failures<T: Debug>(failures: &[T]) {
    assert!(
        failures.is_empty(),
        "{} test cases failed: {:?}",
        failures.len(),
        failures
    );
}

/// Convert a list of `&str` slices into owned strings.
///
/// Useful when comparing against dimension name lists in documents.
pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
