//! Default field mapping for both providers.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::labels::{Label, LabelBuilder, LabelError};
use crate::providers::{InatObservation, MoObservation, ObservationId, ObservationRecord, Taxon};

const NOT_AVAILABLE: &str = "Not available";

/// Higher ranks printed from resolved ancestors, in label order.
const LABEL_RANKS: [(&str, &str); 5] = [
    ("kingdom", "Kingdom"),
    ("phylum", "Phylum"),
    ("class", "Class"),
    ("order", "Order"),
    ("family", "Family"),
];

/// Mushroom Observer sequence loci that get a barcode line.
fn barcode_field(locus: &str) -> Option<&'static str> {
    match locus.trim().to_ascii_uppercase().as_str() {
        "ITS" => Some("DNA Barcode ITS"),
        "LSU" => Some("DNA Barcode LSU"),
        "TEF1" | "EF1" => Some("DNA Barcode TEF1"),
        "RPB1" => Some("DNA Barcode RPB1"),
        "RPB2" => Some("DNA Barcode RPB2"),
        _ => None,
    }
}

/// Builds herbarium labels from observation fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct FieldLabelBuilder;

impl LabelBuilder for FieldLabelBuilder {
    fn build(&self, record: &ObservationRecord) -> Result<Label, LabelError> {
        match record {
            ObservationRecord::INaturalist {
                observation,
                ancestors,
            } => inaturalist_label(observation, ancestors),
            ObservationRecord::MushroomObserver {
                number,
                observation,
            } => Ok(mushroom_observer_label(*number, observation)),
        }
    }
}

fn inaturalist_label(obs: &InatObservation, ancestors: &[Taxon]) -> Result<Label, LabelError> {
    let id = ObservationId::INaturalist(obs.id);
    let user = obs.user.as_ref().ok_or(LabelError::MissingField("observer"))?;
    let mut label = Label::new(id.to_string());

    let scientific = obs.taxon.as_ref().and_then(|t| t.name.clone());
    let common = obs
        .taxon
        .as_ref()
        .and_then(|t| t.preferred_common_name.clone())
        .or_else(|| scientific.clone());

    label.push("Scientific Name", scientific.unwrap_or_else(|| NOT_AVAILABLE.into()));
    label.push("Common Name", common.unwrap_or_else(|| NOT_AVAILABLE.into()));
    label.push("iNat Observation Number", obs.id.to_string());
    label.push("iNaturalist URL", id.web_url());
    label.push(
        "Location",
        obs.place_guess
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(NOT_AVAILABLE),
    );
    label.push("GPS Coordinates", gps_coordinates(obs));
    label.push(
        "Date Observed",
        observed_date(obs).unwrap_or_else(|| NOT_AVAILABLE.into()),
    );
    label.push(
        "Observer",
        match user.name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(name) => format!("{name} ({})", user.login),
            None => user.login.clone(),
        },
    );

    for (rank, field) in LABEL_RANKS {
        let name = ancestors
            .iter()
            .find(|t| t.rank.as_deref().is_some_and(|r| r.eq_ignore_ascii_case(rank)))
            .and_then(|t| t.name.as_deref());
        if let Some(name) = name {
            label.push(field, name);
        }
    }

    if let Some(its) = obs.field("DNA Barcode ITS") {
        let bp = its.chars().filter(|c| !c.is_whitespace()).count();
        label.push("DNA Barcode ITS", format!("{bp} bp"));
    }
    if let Some(accession) = obs
        .field("GenBank Accession Number")
        .or_else(|| obs.field("GenBank Accession"))
    {
        label.push("GenBank Accession Number", accession);
    }
    if let Some(provisional) = obs.field("Provisional Species Name") {
        label.push("Provisional Species Name", provisional);
    }

    label.push(
        "Notes",
        obs.description
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("No notes available"),
    );
    Ok(label)
}

fn mushroom_observer_label(number: u64, obs: &MoObservation) -> Label {
    let id = ObservationId::MushroomObserver(number);
    let mut label = Label::new(id.to_string());

    label.push("Scientific Name", obs.scientific_name().unwrap_or("Unknown"));
    label.push("MO Observation Number", id.to_string());
    label.push("Mushroom Observer URL", id.web_url());
    label.push("Observer", obs.login().unwrap_or("Unknown"));

    if let Some(herbarium) = obs.herbarium_name.as_deref() {
        label.push("Herbarium Name", herbarium);
    }
    if let Some(catalog) = obs.herbarium_catalog_number() {
        label.push("Herbarium Catalog Number", catalog);
    }

    for sequence in &obs.sequences {
        let Some(field) = sequence.locus.as_deref().and_then(barcode_field) else {
            continue;
        };
        let bp = sequence.base_pairs();
        if bp > 0 {
            label.push(field, format!("{bp} bp"));
        }
    }
    label
}

fn gps_coordinates(obs: &InatObservation) -> String {
    let Some((lat, lon)) = obs.geojson.as_ref().and_then(|g| g.lat_lon()) else {
        return NOT_AVAILABLE.to_string();
    };
    let coords = format!("{lat:.5}, {lon:.5}");
    match obs.positional_accuracy.filter(|a| *a > 0.0) {
        Some(accuracy) if accuracy.fract() == 0.0 => format!("{coords} (±{accuracy:.0}m)"),
        Some(accuracy) => format!("{coords} (±{accuracy}m)"),
        None => coords,
    }
}

/// `YYYY-MM-DD` from the structured date, else from the free-text one.
fn observed_date(obs: &InatObservation) -> Option<String> {
    obs.observed_on
        .as_deref()
        .and_then(parse_date)
        .or_else(|| obs.observed_on_string.as_deref().and_then(parse_date))
        .map(|d| d.format("%Y-%m-%d").to_string())
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %I:%M %p",
    "%Y-%m-%d %I:%M:%S %p",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%B %d, %Y"];

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.date_naive());
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.date());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    // "2023-09-14 2:15:33 PM PDT" and similar: the leading date is enough.
    let head = raw.split_whitespace().next()?;
    DATE_FORMATS[..2]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(head, format).ok())
}
