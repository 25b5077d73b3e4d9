//! Declared data contracts of a stage.

use std::collections::HashSet;

/// Dataset paths a stage expects on input and provides on output.
///
/// Built once per stage type and never mutated. `provided` always starts with
/// `expected`, so every schema is self-consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSchema {
    expected: Vec<String>,
    provided: Vec<String>,
}

impl DataSchema {
    /// Schema where the stage provides what it expects plus `own` paths.
    pub fn extending(expected: &[&str], own: &[&str]) -> Self {
        let expected: Vec<String> = expected.iter().map(|p| normalize(p)).collect();
        let mut provided = expected.clone();
        for path in own.iter().map(|p| normalize(p)) {
            if !provided.contains(&path) {
                provided.push(path);
            }
        }
        Self { expected, provided }
    }

    /// Schema of a stage that expects exactly what it provides.
    pub fn closed(provided: &[&str]) -> Self {
        Self::extending(provided, &[])
    }

    pub fn expected(&self) -> &[String] {
        &self.expected
    }

    pub fn provided(&self) -> &[String] {
        &self.provided
    }

    pub fn is_self_consistent(&self) -> bool {
        let provided: HashSet<&str> = self.provided.iter().map(String::as_str).collect();
        self.expected.iter().all(|p| provided.contains(p.as_str()))
    }

    /// Paths this schema expects that `upstream` does not provide, in expected order.
    pub fn missing_from(&self, upstream: &DataSchema) -> Vec<String> {
        let provided: HashSet<&str> = upstream.provided.iter().map(String::as_str).collect();
        self.expected
            .iter()
            .filter(|p| !provided.contains(p.as_str()))
            .cloned()
            .collect()
    }

    pub fn accepts_output_of(&self, upstream: &DataSchema) -> bool {
        self.missing_from(upstream).is_empty()
    }
}

fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extending_keeps_order_and_consistency() {
        let schema = DataSchema::extending(
            &["/data/dat1", "data/dat2"],
            &["/params/params1", "/data/dat1", "/params/params2"],
        );
        assert_eq!(schema.expected(), ["/data/dat1", "/data/dat2"]);
        assert_eq!(
            schema.provided(),
            ["/data/dat1", "/data/dat2", "/params/params1", "/params/params2"]
        );
        assert!(schema.is_self_consistent());
    }

    #[test]
    fn test_missing_from() {
        let upstream = DataSchema::closed(&["/data/arrEhor", "/version"]);
        let downstream = DataSchema::extending(&["/data/arrEhor", "/params/photonEnergy"], &[]);

        assert_eq!(downstream.missing_from(&upstream), vec!["/params/photonEnergy".to_string()]);
        assert!(!downstream.accepts_output_of(&upstream));
        assert!(DataSchema::closed(&["/version"]).accepts_output_of(&upstream));
    }
}
