use fail::FailScenario;

/// Fail points configured for the lifetime of a test.
///
/// Scenarios are serialized process-wide by [`FailScenario`], and every configured fail point is
/// turned off again on drop.
pub struct FailPointScenario<'a> {
    _scenario: FailScenario<'a>,
    names: Vec<String>,
}

impl<'a> FailPointScenario<'a> {
    /// Configures each `(name, action)` pair, for example `("table_sink_worker.before_emit", "return")`.
    ///
    /// # Panics
    ///
    /// Panics if an action cannot be parsed.
    pub fn setup(fail_points: &[(&str, &str)]) -> FailPointScenario<'a> {
        let scenario = FailScenario::setup();

        let mut names = Vec::with_capacity(fail_points.len());
        for (name, action) in fail_points {
            if let Err(err) = fail::cfg(*name, action) {
                panic!("invalid action '{action}' for fail point '{name}': {err}");
            }
            names.push(name.to_string());
        }

        Self {
            _scenario: scenario,
            names,
        }
    }
}

impl Drop for FailPointScenario<'_> {
    fn drop(&mut self) {
        for name in &self.names {
            fail::remove(name);
        }
    }
}
