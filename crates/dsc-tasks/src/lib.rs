//! Task plug-ins shipped with the discovery core.

pub mod httpx;
pub mod subfinder;

use std::sync::Arc;

use dsc_core::TaskDefinition;

/// The registration table handed to [`dsc_core::Registry::new`].
pub fn catalogue() -> Vec<Arc<dyn TaskDefinition>> {
    vec![Arc::new(subfinder::Subfinder), Arc::new(httpx::Httpx)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_candidates_are_valid() {
        let candidates = catalogue();
        assert_eq!(
            dsc_core::discover(&candidates),
            vec!["projectdiscovery.subfinder", "projectdiscovery.httpx"]
        );
        for candidate in &candidates {
            assert!(dsc_core::validate(candidate.as_ref()).is_ok());
        }
    }
}
