use std::sync::LazyLock;

use regex::{Captures, Regex};

// From https://dashif.org/docs/DASH-IF-IOP-v4.3.pdf:
// "For the avoidance of doubt, only %0[width]d is permitted and no other identifiers."
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"
static TEMPLATE_VARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(RepresentationID|Number|Time|Bandwidth)(?:%0(\d+)d)?\$").unwrap()
});

/// Substitution values for a `SegmentTemplate@media` / `@initialization` URL.
#[derive(Debug, Clone, Default)]
pub(crate) struct TemplateVars {
    pub representation_id: String,
    pub bandwidth: String,
    pub number: Option<u64>,
    pub time: Option<u64>,
}

impl TemplateVars {
    fn value_of(&self, key: &str) -> Option<String> {
        match key {
            "RepresentationID" => Some(self.representation_id.clone()),
            "Bandwidth" => Some(self.bandwidth.clone()),
            "Number" => self.number.map(|n| n.to_string()),
            "Time" => self.time.map(|t| t.to_string()),
            _ => None,
        }
    }

    pub fn resolve(&self, template: &str) -> String {
        TEMPLATE_VARS
            .replace_all(template, |caps: &Captures| {
                let Some(value) = self.value_of(&caps[1]) else {
                    // Identifier without a value; leave it visible in the URI
                    // rather than silently producing a broken one.
                    return caps[0].to_string();
                };
                match caps.get(2).and_then(|w| w.as_str().parse::<usize>().ok()) {
                    Some(width) => format!("{value:0>width$}"),
                    None => value,
                }
            })
            .into_owned()
    }
}
