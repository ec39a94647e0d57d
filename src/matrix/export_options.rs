use crate::conf::Params;
use crate::errors::PollerError;
use regex::Regex;

/// Filter and selection rules consumed by exporters.
///
/// Include lists are permissive when empty; exclude rules always win.
/// The defaults export everything and promote the instance key to an
/// `instance` label.
#[derive(Clone, Debug)]
pub struct ExportOptions {
    include_metrics: Vec<Regex>,
    exclude_metrics: Vec<Regex>,
    include_labels: Vec<Regex>,
    exclude_labels: Vec<Regex>,
    promote_instance_key: bool,
    export_data: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_metrics: Vec::new(),
            exclude_metrics: Vec::new(),
            include_labels: Vec::new(),
            exclude_labels: Vec::new(),
            promote_instance_key: true,
            export_data: true,
        }
    }
}

fn compile(patterns: &[String], key: &str) -> Result<Vec<Regex>, PollerError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| PollerError::InvalidParam(format!("export_options ({key}): {e}")))
        })
        .collect()
}

impl ExportOptions {
    /// Parse an `export_options` subtree.
    ///
    /// Recognized children: `include_metrics`, `exclude_metrics`,
    /// `include_labels`, `exclude_labels` (regex lists), `instance_key`
    /// and `export_data` (True/False).
    pub fn from_params(params: &Params) -> Result<Self, PollerError> {
        let mut opts = Self::default();
        opts.include_metrics = compile(&params.child_list("include_metrics"), "include_metrics")?;
        opts.exclude_metrics = compile(&params.child_list("exclude_metrics"), "exclude_metrics")?;
        opts.include_labels = compile(&params.child_list("include_labels"), "include_labels")?;
        opts.exclude_labels = compile(&params.child_list("exclude_labels"), "exclude_labels")?;
        if let Some(v) = params.child_string("instance_key") {
            opts.promote_instance_key = !v.eq_ignore_ascii_case("false");
        }
        if let Some(v) = params.child_string("export_data") {
            opts.export_data = !v.eq_ignore_ascii_case("false");
        }
        Ok(opts)
    }

    pub fn metric_allowed(&self, key: &str) -> bool {
        if self.exclude_metrics.iter().any(|r| r.is_match(key)) {
            return false;
        }
        self.include_metrics.is_empty() || self.include_metrics.iter().any(|r| r.is_match(key))
    }

    pub fn label_allowed(&self, key: &str) -> bool {
        if self.exclude_labels.iter().any(|r| r.is_match(key)) {
            return false;
        }
        self.include_labels.is_empty() || self.include_labels.iter().any(|r| r.is_match(key))
    }

    pub fn promotes_instance_key(&self) -> bool {
        self.promote_instance_key
    }

    pub fn is_exportable(&self) -> bool {
        self.export_data
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_defaults_allow_everything() {
        let opts = ExportOptions::default();
        assert!(opts.metric_allowed("anything"));
        assert!(opts.label_allowed("node"));
        assert!(opts.promotes_instance_key());
        assert!(opts.is_exportable());
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let params = Params::from_yaml(
            "include_metrics: ['.*_time']\nexclude_metrics: ['^api_time$']\n",
        )
        .unwrap();
        let opts = ExportOptions::from_params(&params).unwrap();
        assert!(opts.metric_allowed("poll_time"));
        assert!(!opts.metric_allowed("api_time"));
        assert!(!opts.metric_allowed("count"));
    }

    #[test]
    fn test_flags() {
        let params =
            Params::from_yaml("instance_key: False\nexport_data: False\n").unwrap();
        let opts = ExportOptions::from_params(&params).unwrap();
        assert!(!opts.promotes_instance_key());
        assert!(!opts.is_exportable());
    }

    #[test]
    fn test_bad_regex_is_invalid_param() {
        let params = Params::from_yaml("include_labels: ['[']\n").unwrap();
        assert!(matches!(
            ExportOptions::from_params(&params),
            Err(PollerError::InvalidParam(_))
        ));
    }
}
