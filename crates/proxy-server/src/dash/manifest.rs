use crate::error::{ProxyError, Result};
use roxmltree::Node;
use serde::Serialize;

pub const REPRESENTATION_ID_TOKEN: &str = "$RepresentationID$";
pub const NUMBER_TOKEN: &str = "$Number$";

/// One rung of the bitrate ladder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Representation {
    pub id: String,
    /// Bits per second.
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
    pub codecs: String,
    pub media_template: String,
    pub init_template: String,
    pub start_number: u64,
    pub segment_duration_secs: f64,
}

impl Representation {
    /// Media segment URL for `number`.
    pub fn media_url(&self, number: u64) -> String {
        expand_template(&self.media_template, &self.id, number)
    }

    /// Initialization segment URL.
    pub fn init_url(&self) -> String {
        expand_template(&self.init_template, &self.id, self.start_number)
    }
}

/// Literal substitution of the identifier and number placeholders.
pub fn expand_template(template: &str, id: &str, number: u64) -> String {
    template
        .replace(REPRESENTATION_ID_TOKEN, id)
        .replace(NUMBER_TOKEN, &number.to_string())
}

/// `SegmentTemplate` attributes as written; absent ones stay `None`.
#[derive(Debug, Default, Clone)]
struct SegmentTemplate {
    media: Option<String>,
    initialization: Option<String>,
    start_number: Option<u64>,
    timescale: Option<u64>,
    duration: Option<u64>,
}

impl SegmentTemplate {
    fn from_parent(parent: Node<'_, '_>) -> Option<Self> {
        let node = child(parent, "SegmentTemplate")?;
        Some(SegmentTemplate {
            media: node.attribute("media").map(str::to_string),
            initialization: node.attribute("initialization").map(str::to_string),
            start_number: number_attr(node, "startNumber"),
            timescale: number_attr(node, "timescale"),
            duration: number_attr(node, "duration"),
        })
    }

    /// Seconds per segment when both timescale and duration are usable.
    fn segment_seconds(&self) -> Option<f64> {
        let timescale = self.timescale.unwrap_or(1);
        let duration = self.duration.unwrap_or(0);
        (timescale != 0 && duration != 0).then(|| duration as f64 / timescale as f64)
    }
}

/// Bitrate ladder for one manifest, sorted ascending by bandwidth.
///
/// Immutable once built. A manifest refresh builds a new engine and swaps it
/// in whole.
#[derive(Debug, Clone)]
pub struct ManifestEngine {
    representations: Vec<Representation>,
}

impl ManifestEngine {
    /// Build the ladder from the first `AdaptationSet` of the first `Period`.
    pub fn parse(manifest: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(manifest)
            .map_err(|e| ProxyError::InvalidManifest(format!("not utf-8: {e}")))?;
        let text = text.trim_start_matches('\u{feff}');
        let doc = roxmltree::Document::parse(text)
            .map_err(|e| ProxyError::InvalidManifest(e.to_string()))?;

        let mpd = doc.root_element();
        if !mpd.has_tag_name("MPD") {
            return Err(ProxyError::InvalidManifest("MPD element not found".into()));
        }
        let period = child(mpd, "Period")
            .ok_or_else(|| ProxyError::InvalidManifest("Period element not found".into()))?;
        let adaptation_set = child(period, "AdaptationSet").ok_or_else(|| {
            ProxyError::InvalidManifest("AdaptationSet element not found".into())
        })?;

        let set_template = SegmentTemplate::from_parent(adaptation_set).unwrap_or_default();

        let representations = adaptation_set
            .children()
            .filter(|n| n.has_tag_name("Representation"))
            .map(|node| build_representation(node, &set_template))
            .collect();

        Ok(Self::from_representations(representations))
    }

    pub fn from_representations(mut representations: Vec<Representation>) -> Self {
        // Stable sort keeps document order among equal bandwidths
        representations.sort_by_key(|r| r.bandwidth);
        Self { representations }
    }

    pub fn representations(&self) -> &[Representation] {
        &self.representations
    }

    pub fn is_empty(&self) -> bool {
        self.representations.is_empty()
    }

    /// Highest representation whose bandwidth fits `bandwidth_kbps`, or the
    /// lowest one when nothing fits.
    pub fn select(&self, bandwidth_kbps: f64) -> Result<&Representation> {
        let lowest = self
            .representations
            .first()
            .ok_or(ProxyError::NoRepresentations)?;
        // `as` saturates and maps NaN to zero
        let budget_bps = (bandwidth_kbps * 1000.0) as u64;

        let mut best = lowest;
        for rep in &self.representations {
            if rep.bandwidth > budget_bps {
                break;
            }
            best = rep;
        }
        Ok(best)
    }
}

fn build_representation(node: Node<'_, '_>, set: &SegmentTemplate) -> Representation {
    let own = SegmentTemplate::from_parent(node);
    let template = own.as_ref().unwrap_or(set);

    let media_template = template
        .media
        .clone()
        .or_else(|| set.media.clone())
        .unwrap_or_default();
    let init_template = template
        .initialization
        .clone()
        .or_else(|| set.initialization.clone())
        .unwrap_or_default();
    let start_number = template.start_number.or(set.start_number).unwrap_or(1);
    let segment_duration_secs = template
        .segment_seconds()
        .or_else(|| set.segment_seconds())
        .unwrap_or(0.0);

    Representation {
        id: node.attribute("id").unwrap_or_default().to_string(),
        bandwidth: number_attr(node, "bandwidth").unwrap_or(0),
        width: number_attr(node, "width").unwrap_or(0) as u32,
        height: number_attr(node, "height").unwrap_or(0) as u32,
        codecs: node.attribute("codecs").unwrap_or_default().to_string(),
        media_template,
        init_template,
        start_number,
        segment_duration_secs,
    }
}

fn child<'a, 'input>(parent: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    parent.children().find(|n| n.has_tag_name(name))
}

fn number_attr(node: Node<'_, '_>, name: &str) -> Option<u64> {
    node.attribute(name)?.trim().parse().ok()
}
