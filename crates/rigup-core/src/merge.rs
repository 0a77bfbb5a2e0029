//! Merging a previously applied configuration with a new request.
//!
//! Rules:
//! - components only in `requested` are appended
//! - components in both take the requested version (and requested package
//!   metadata when given)
//! - components only in `existing` are kept, in their original position
//! - GPU support and the merge flag come from `requested` when it sets them,
//!   else from `existing`
//! - disk space always comes from `requested`
//!
//! The result is validated; merging twice with the same request changes
//! nothing.

use crate::domain::{InstallationConfiguration, ValidationError};

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigurationMerger;

impl ConfigurationMerger {
    pub fn new() -> Self {
        Self
    }

    pub fn merge(
        &self,
        existing: &InstallationConfiguration,
        requested: &InstallationConfiguration,
    ) -> Result<InstallationConfiguration, ValidationError> {
        let mut merged = existing.clone();

        for sel in &requested.components {
            let mut sel = sel.clone();
            if sel.package.is_none() {
                sel.package = existing
                    .selection(sel.component)
                    .and_then(|prev| prev.package.clone());
            }
            merged.upsert(sel);
        }

        merged.gpu = requested.gpu.clone().or_else(|| existing.gpu.clone());
        merged.merge_existing = requested.merge_existing.or(existing.merge_existing);
        merged.disk = requested.disk;

        merged.validate()?;
        Ok(merged)
    }
}
