//! The weigh-ticket record produced by extraction and written by persistence.
//!
//! Wire names are the French field names the store schema uses
//! (`entreprise`, `poids_net_kg`, ...). Text fields are never null on the
//! wire: unknown text is `""`. Weights are `null` when unknown, never `""`.
//!
//! Decoding is lenient about value *types* (models occasionally emit a ticket
//! number as a JSON number, or a weight as `"18 340 kg"`) but strict about
//! *shape*: unknown keys are rejected.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Net weight tolerance used by [`StructuredReceipt::weight_discrepancy`].
pub const NET_WEIGHT_TOLERANCE_KG: f64 = 1.0;

/// Structured weigh-ticket data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredReceipt {
    #[serde(default, deserialize_with = "lenient_string")]
    pub entreprise: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub telephone: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub numero_pesee: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date_entree: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub heure_entree: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date_sortie: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub heure_sortie: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub matricule: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub client: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub transporteur: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub destination: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bon_livraison: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub produit: String,

    /// Incoming (gross) weight in kilograms.
    #[serde(default, deserialize_with = "lenient_weight")]
    pub poids_entree_kg: Option<f64>,
    /// Outgoing (tare) weight in kilograms.
    #[serde(default, deserialize_with = "lenient_weight")]
    pub poids_sortie_kg: Option<f64>,
    /// Net weight in kilograms.
    #[serde(default, deserialize_with = "lenient_weight")]
    pub poids_net_kg: Option<f64>,

    #[serde(default, deserialize_with = "lenient_installer")]
    pub installateur: Installer,
}

/// Scale installer contact printed on the ticket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Installer {
    #[serde(default, deserialize_with = "lenient_string")]
    pub nom: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub telephone: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: String,
}

impl StructuredReceipt {
    /// Decode a JSON object into a record.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Return a copy whose weights satisfy the store schema: finite or `None`.
    pub fn normalized(&self) -> Self {
        let finite = |w: Option<f64>| w.filter(|v| v.is_finite());
        Self {
            poids_entree_kg: finite(self.poids_entree_kg),
            poids_sortie_kg: finite(self.poids_sortie_kg),
            poids_net_kg: finite(self.poids_net_kg),
            ..self.clone()
        }
    }

    /// True when no field carries any information.
    pub fn is_blank(&self) -> bool {
        *self == StructuredReceipt::default()
    }

    /// Text fields in schema order, paired with their wire names.
    pub fn text_fields(&self) -> [(&'static str, &str); 18] {
        [
            ("entreprise", self.entreprise.as_str()),
            ("description", self.description.as_str()),
            ("telephone", self.telephone.as_str()),
            ("email", self.email.as_str()),
            ("numero_pesee", self.numero_pesee.as_str()),
            ("date_entree", self.date_entree.as_str()),
            ("heure_entree", self.heure_entree.as_str()),
            ("date_sortie", self.date_sortie.as_str()),
            ("heure_sortie", self.heure_sortie.as_str()),
            ("matricule", self.matricule.as_str()),
            ("client", self.client.as_str()),
            ("transporteur", self.transporteur.as_str()),
            ("destination", self.destination.as_str()),
            ("bon_livraison", self.bon_livraison.as_str()),
            ("produit", self.produit.as_str()),
            ("installateur.nom", self.installateur.nom.as_str()),
            ("installateur.telephone", self.installateur.telephone.as_str()),
            ("installateur.email", self.installateur.email.as_str()),
        ]
    }

    /// How far the net weight is from `|entree - sortie|`, when all three
    /// weights are known and the gap exceeds [`NET_WEIGHT_TOLERANCE_KG`].
    pub fn weight_discrepancy(&self) -> Option<f64> {
        let (gross, tare, net) = (
            self.poids_entree_kg?,
            self.poids_sortie_kg?,
            self.poids_net_kg?,
        );
        let gap = ((gross - tare).abs() - net).abs();
        (gap > NET_WEIGHT_TOLERANCE_KG).then_some(gap)
    }

    /// A human-readable name for the ticket, when the record has enough data.
    pub fn display_name(&self) -> Option<String> {
        let company = self.entreprise.trim();
        let ticket = self.numero_pesee.trim();
        match (company.is_empty(), ticket.is_empty()) {
            (false, false) => Some(format!("{company} - Ticket {ticket}")),
            (false, true) => Some(company.to_string()),
            (true, false) => Some(format!("Ticket {ticket}")),
            (true, true) => None,
        }
    }
}

// ── Lenient field decoders ───────────────────────────────────────────────

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => {
            warn!("Non-scalar value in text field, keeping JSON text: {}", other);
            other.to_string()
        }
    })
}

fn lenient_weight<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_weight(&s),
        _ => None,
    })
}

fn lenient_installer<'de, D>(deserializer: D) -> Result<Installer, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Installer>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse a printed weight such as `"18 340 kg"`, `"18.340"` or `"12.5 t"`.
///
/// Returns kilograms. When both `.` and `,` appear, the last one is the
/// decimal separator. A lone separator repeated, or followed by exactly
/// three digits, groups thousands; otherwise it is the decimal separator.
/// Tonne values always read a lone separator as decimal.
pub fn parse_weight(raw: &str) -> Option<f64> {
    let lowered = raw.trim().to_lowercase();
    let (number, factor) = if let Some(stripped) = lowered.strip_suffix("kg") {
        (stripped, 1.0)
    } else if let Some(stripped) = lowered.strip_suffix('t') {
        (stripped, 1000.0)
    } else {
        (lowered.as_str(), 1.0)
    };

    let compact: String = number
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '\u{202f}')
        .collect();
    if compact.is_empty() {
        return None;
    }

    let normalised = match (compact.rfind('.'), compact.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => compact.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => compact.replace(',', ""),
        (Some(pos), None) => lone_separator(&compact, '.', pos, factor > 1.0),
        (None, Some(pos)) => lone_separator(&compact, ',', pos, factor > 1.0),
        (None, None) => compact,
    };

    normalised
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v * factor)
}

fn lone_separator(compact: &str, sep: char, pos: usize, tonnes: bool) -> String {
    let grouped =
        compact.matches(sep).count() > 1 || (!tonnes && compact.len() - pos - 1 == 3);
    if grouped {
        compact.replace(sep, "")
    } else {
        compact.replace(sep, ".")
    }
}
