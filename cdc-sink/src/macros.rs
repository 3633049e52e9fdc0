//! Macros building [`crate::error::SinkError`] values with little boilerplate.

/// Creates a [`crate::error::SinkError`] from an error kind and a static description.
///
/// Optional trailing arguments are formatted into the dynamic detail, and a `source = expr`
/// suffix attaches the originating error:
///
/// ```ignore
/// sink_error!(ErrorKind::ValidationError, "Event rejected");
/// sink_error!(ErrorKind::ValidationError, "Event rejected", "table {} at {}", table_id, ts);
/// sink_error!(ErrorKind::SortEngineFetchFailed, "Fetch failed"; source = err);
/// ```
#[macro_export]
macro_rules! sink_error {
    ($kind:expr, $desc:expr $(; source = $source:expr)?) => {
        $crate::error::SinkError::from(($kind, $desc))
            $(.with_source($source))?
    };
    ($kind:expr, $desc:expr, $($detail:tt)+) => {
        $crate::error::SinkError::from(($kind, $desc, ::std::format!($($detail)+)))
    };
}

/// Returns early from the current function with a [`crate::error::SinkError`].
///
/// Accepts the same arguments as [`sink_error!`].
#[macro_export]
macro_rules! bail {
    ($($args:tt)+) => {
        return ::core::result::Result::Err($crate::sink_error!($($args)+))
    };
}
