use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;

use crate::engine::FaceEngine;
use crate::loader::ImageLoader;
use crate::matcher::LabeledDescriptors;

/// JavaScript truthiness: null, false, 0, NaN and "" are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text form of a JSON value: strings verbatim, anything else as JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A usable dataset element: both fields present and truthy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEntry {
    pub id: String,
    pub imglink: String,
}

impl ReferenceEntry {
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = value.get("id").filter(|v| is_truthy(v))?;
        let imglink = value.get("imglink").filter(|v| is_truthy(v))?;
        Some(Self {
            id: value_text(id),
            imglink: value_text(imglink),
        })
    }
}

async fn describe_entry(
    index: usize,
    raw: &Value,
    loader: &ImageLoader,
    engine: &Arc<dyn FaceEngine>,
) -> Option<LabeledDescriptors> {
    let Some(entry) = ReferenceEntry::from_value(raw) else {
        log::warn!("dataset[{index}]: missing id or imglink, skipping");
        return None;
    };

    let img = match loader.load(&entry.imglink).await {
        Ok(img) => img,
        Err(e) => {
            log::warn!("dataset[{index}] ({}): {e}, skipping", entry.id);
            return None;
        }
    };

    let engine = Arc::clone(engine);
    let detected = tokio::task::spawn_blocking(move || engine.single_descriptor(&img)).await;
    match detected {
        Ok(Ok(Some(descriptor))) => Some(LabeledDescriptors::single(entry.id, descriptor)),
        Ok(Ok(None)) => {
            log::warn!("dataset[{index}] ({}): no face detected, skipping", entry.id);
            None
        }
        Ok(Err(e)) => {
            log::warn!("dataset[{index}] ({}): detection failed: {e:#}, skipping", entry.id);
            None
        }
        Err(e) => {
            log::warn!("dataset[{index}] ({}): detection task failed: {e}, skipping", entry.id);
            None
        }
    }
}

/// Describe every dataset entry concurrently and keep the ones that produced a face.
///
/// Failures are per entry; the survivors keep dataset order.
pub async fn build_labeled_descriptors(
    dataset: &[Value],
    loader: &ImageLoader,
    engine: &Arc<dyn FaceEngine>,
) -> Vec<LabeledDescriptors> {
    let described = join_all(
        dataset
            .iter()
            .enumerate()
            .map(|(index, raw)| describe_entry(index, raw, loader, engine)),
    )
    .await;

    let labeled: Vec<LabeledDescriptors> = described.into_iter().flatten().collect();
    log::info!(
        "{} of {} dataset entries produced a face descriptor",
        labeled.len(),
        dataset.len()
    );
    labeled
}
