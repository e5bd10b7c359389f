//! Geographic location of the device

use std::sync::Arc;

use chrono::{DateTime, Utc};
use resource_tree::{Resource, Result};

/// A location fix reported with `update_location`
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub accuracy: Option<f64>,
    /// When the fix was taken; rendered as RFC 3339 UTC
    pub measured_at: DateTime<Utc>,
}

impl DeviceLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: None,
            accuracy: None,
            measured_at: Utc::now(),
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn measured_at(mut self, at: DateTime<Utc>) -> Self {
        self.measured_at = at;
        self
    }

    pub(crate) fn build(node: &Arc<Resource>) -> Result<()> {
        node.add_child("latitude", ())?;
        node.add_child("longitude", ())?;
        node.add_child("elevation", ())?;
        node.add_child("measuredDateTime", ())?;
        node.add_child("accuracy", ())?;
        Ok(())
    }

    /// Write this fix into a `location` node without notifying observers
    pub(crate) fn apply(&self, node: &Arc<Resource>) -> Result<()> {
        node.child_or_insert("latitude")?.update(self.latitude, false)?;
        node.child_or_insert("longitude")?.update(self.longitude, false)?;
        node.child_or_insert("elevation")?.update(self.elevation, false)?;
        node.child_or_insert("measuredDateTime")?
            .update(self.measured_at, false)?;
        node.child_or_insert("accuracy")?.update(self.accuracy, false)?;
        Ok(())
    }
}
