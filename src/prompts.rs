//! Prompts for weigh-ticket extraction.
//!
//! Every prompt lives here so a wording change touches exactly one place and
//! unit tests can inspect the text without calling a model. The extraction
//! instruction asks for the final schema directly; there is no intermediate
//! "merchant / items / totals" shape to translate afterwards.

/// System prompt for the extraction call.
///
/// Used when `ExtractionConfig::system_prompt` is `None`.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a document scanning assistant specialised in weigh tickets (bons de pesée) issued by quarries, recycling centres and logistics sites.

Read the attached document exactly as printed:
- Transcribe values, do not guess or complete them.
- Correct obvious OCR confusions (O/0, l/1) only when the printed context makes the value certain.
- Keep dates and times in the format printed on the ticket.
- Weights are in kilograms; convert tonnes to kilograms when the ticket prints tonnes."#;

/// Instruction sent next to the document. Fixes the output schema.
pub const EXTRACTION_INSTRUCTION: &str = r#"Extract the data from this weigh ticket and return ONLY one JSON object with exactly these keys:

{
  "entreprise": "company that issued the ticket",
  "description": "one-sentence summary of the ticket",
  "telephone": "company phone number",
  "email": "company email",
  "numero_pesee": "weigh ticket number",
  "date_entree": "entry date",
  "heure_entree": "entry time",
  "date_sortie": "exit date",
  "heure_sortie": "exit time",
  "matricule": "vehicle registration",
  "client": "client name",
  "transporteur": "carrier name",
  "destination": "destination / site",
  "bon_livraison": "delivery note number",
  "produit": "product or material",
  "poids_entree_kg": 0,
  "poids_sortie_kg": 0,
  "poids_net_kg": 0,
  "installateur": {
    "nom": "scale installer name",
    "telephone": "scale installer phone",
    "email": "scale installer email"
  }
}

Rules:
- Use "" for any text field that is missing or unreadable. Never use null for text fields.
- Use null for any weight that is missing or unreadable. Never use "" for weights.
- Weights are plain numbers in kilograms, without units or thousands separators.
- Do not add keys, comments, markdown fences or any text outside the JSON object."#;

/// System prompt describing the persistence step.
pub const PERSISTENCE_SYSTEM_PROMPT: &str =
    "You take extracted weigh-ticket data and save it to the receipts database under the job's receipt id.";

/// Build the natural-language task handed to the network for one job.
///
/// Embeds the MIME hint, the source URL and the receipt id so the transcript
/// of a run is self-describing.
pub fn task_prompt(url: &str, receipt_id: &str, mime_type: Option<&str>) -> String {
    format!(
        "Extract the key data from this receipt file (MIME type: {mime}): {url}.\n\
         Use the \"analyze_receipt_file\" tool with both the fileUrl and mimeType so you can read the binary contents, \
         then save the structured data to the database using the receiptId: {receipt_id}.",
        mime = mime_type.unwrap_or("unknown"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_lists_every_schema_key() {
        for key in [
            "entreprise",
            "description",
            "telephone",
            "email",
            "numero_pesee",
            "date_entree",
            "heure_entree",
            "date_sortie",
            "heure_sortie",
            "matricule",
            "client",
            "transporteur",
            "destination",
            "bon_livraison",
            "produit",
            "poids_entree_kg",
            "poids_sortie_kg",
            "poids_net_kg",
            "installateur",
            "nom",
        ] {
            assert!(
                EXTRACTION_INSTRUCTION.contains(&format!("\"{key}\"")),
                "missing {key}"
            );
        }
    }

    #[test]
    fn instruction_states_default_rules() {
        assert!(EXTRACTION_INSTRUCTION.contains("Use \"\""));
        assert!(EXTRACTION_INSTRUCTION.contains("Use null"));
        assert!(!EXTRACTION_INSTRUCTION.contains("merchant"));
    }

    #[test]
    fn task_prompt_embeds_job_fields() {
        let p = task_prompt("https://files.example/t.jpg", "rcpt_42", Some("image/jpeg"));
        assert!(p.contains("MIME type: image/jpeg"));
        assert!(p.contains("https://files.example/t.jpg"));
        assert!(p.contains("receiptId: rcpt_42"));
    }

    #[test]
    fn task_prompt_without_hint() {
        let p = task_prompt("https://files.example/t", "r", None);
        assert!(p.contains("MIME type: unknown"));
    }
}
