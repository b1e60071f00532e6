//! Internal testing utilities for the infergraph crates.

use std::fmt::Debug;
use std::panic::{catch_unwind, RefUnwindSafe, UnwindSafe};

/// Table-driven test runner.
///
/// Build a collection of cases (conventionally a `struct Case` deriving
/// `Debug`, stored in `cases`) and call `cases.test_each(|case| ..)`. Every
/// case is run even if earlier ones fail. Once all cases have been run, the
/// test panics with the number of failures and the debug representation of
/// each failing case.
///
/// ```
/// use infergraph_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case {
///     dims: [i64; 2],
///     product: i64,
/// }
///
/// let cases = [
///     Case { dims: [2, 3], product: 6 },
///     Case { dims: [0, 5], product: 0 },
/// ];
///
/// cases.test_each(|case| {
///     assert_eq!(case.dims.iter().product::<i64>(), case.product);
/// });
/// ```
///
/// Cases and captured values must be unwind safe, since each case runs
/// inside [`catch_unwind`]. Values that are not can be constructed inside
/// the test closure instead, or wrapped in
/// [`AssertUnwindSafe`](std::panic::AssertUnwindSafe).
pub trait TestCases {
    type Case;

    /// Run `test` with a reference to each case.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Run `test` with each case passed by value.
    ///
    /// The debug representation of each case is captured before the case is
    /// moved into the test function.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;
}

fn report_failures(total: usize, failures: &[String]) {
    if !failures.is_empty() {
        panic!(
            "{} of {} test cases failed:\n{}",
            failures.len(),
            total,
            failures.join("\n")
        );
    }
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        I::Item: Debug + RefUnwindSafe,
    {
        let mut total = 0;
        let mut failures = Vec::new();
        for case in self {
            total += 1;
            if catch_unwind(|| test(&case)).is_err() {
                failures.push(format!("{:?}", case));
            }
        }
        report_failures(total, &failures);
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        I::Item: Debug + UnwindSafe,
    {
        let mut total = 0;
        let mut failures = Vec::new();
        for case in self {
            total += 1;
            let desc = format!("{:?}", case);
            let test = &test;
            if catch_unwind(move || test(case)).is_err() {
                failures.push(desc);
            }
        }
        report_failures(total, &failures);
    }
}
