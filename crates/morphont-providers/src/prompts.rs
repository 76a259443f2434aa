//! Prompt templates for the chat-backed collaborators. Every prompt asks for
//! strict JSON; replies are parsed with [`crate::text::json_payload`].

pub const SYSTEM: &str = "You are a concise, clinically-minded pathology assistant. \
                          Always return strict JSON when asked.";

fn bullet_list(items: &[String]) -> String {
  if items.is_empty() {
    return "(none)".to_owned();
  }
  items.iter().map(|q| format!("- {q}")).collect::<Vec<_>>().join("\n")
}

pub fn plan(target: &str, tried: &[String]) -> String {
  format!(
    "You plan literature searches for a pathology ontology.\n\
     Propose 2-4 concise PubMed queries describing the class \"{target}\" and \
     its benign mimics. Mix low-power architecture terms with high-power \
     cytology terms.\n\n\
     Queries already tried (most recent first):\n{}\n\n\
     Return ONLY a JSON list of strings, e.g. [\"q1\", \"q2\"].",
    bullet_list(tried)
  )
}

pub fn summarize(snippet: &str) -> String {
  format!(
    "Summarize this abstract snippet as a clinical morphology summary of at \
     most 60 words, and list its key terms.\n\n\
     Return STRICT JSON:\n\
     {{\n  \"summary\": \"<at most 60 words>\",\n  \"low_power_terms\": [\"...\"],\n  \
     \"high_power_terms\": [\"...\"],\n  \"caveats\": [\"...\"]\n}}\n\
     SNIPPET:\n{snippet}"
  )
}

pub fn extract(target: &str, snippet: &str, summary: &str) -> String {
  format!(
    "Extract ontology concept candidates for the class \"{target}\" from the \
     SNIPPET and SUMMARY below.\n\n\
     Return a STRICT JSON list of objects:\n\
     [\n  {{\"name_snake\": \"<snake_case>\", \"mags\": [\"10x\", \"20x\", \"40x\"], \
     \"text\": \"<at most 25 words>\", \"applies_to\": [\"{target}\"]}}\n]\n\
     Use only the magnifications 10x, 20x and 40x.\n\
     SNIPPET: {snippet}\n\
     SUMMARY: {summary}"
  )
}

pub fn mutate(tried: &[String], hints: &str) -> String {
  format!(
    "Coverage is still thin. Propose 2-4 NEW queries unlike the tried ones.\n\n\
     Hints:\n{hints}\n\n\
     Previously tried (most recent first):\n{}\n\n\
     Return ONLY a JSON list of strings.",
    bullet_list(tried)
  )
}

/// Field list shared by both snapshot drafting prompts.
const SNAPSHOT_FIELDS: &str = "\
- name: concise label for the histopathology concept.
- definition: one morphology-forward sentence emphasising diagnostic cues.
- synonyms: list of synonyms, deduplicated.
- concept_type: one of [\"class\", \"compartment\", \"morphology\", \"interface\", \"substructure\"].
- positives: 3 to 6 short patch-scale phrases listing hallmark findings.
- negatives: 3 to 6 confounders or exclusions that avoid false positives.
- magnifications: subset of [\"10x\", \"20x\", \"40x\"] where the concept is best recognized.";

pub fn draft_item(keyword: &str, source: &str, evidence: &str) -> String {
  format!(
    "You are curating a histopathology ontology.\n\
     Keyword: \"{keyword}\"\n\
     Source: {source}\n\n\
     Use the search evidence below to draft ONE JSON object with the required \
     fields. Focus on morphology cues and differential diagnosis. When evidence \
     is missing, leave a list empty rather than inventing findings.\n\n\
     Evidence:\n{evidence}\n\n\
     Required JSON fields (exactly these):\n{SNAPSHOT_FIELDS}\n\n\
     Respond with valid JSON only."
  )
}

pub fn draft_batch(dataset: &str, classes: &str, num_classes: Option<usize>) -> String {
  let count = num_classes.map_or_else(|| "an unknown number of".to_owned(), |n| n.to_string());
  format!(
    "You are a board-certified pathologist. The dataset is \"{dataset}\", which \
     has {count} high-level class(es).\n\n\
     Dataset class descriptions (use them to anchor definitions and include \
     commonly confused morphologies):\n{classes}\n\n\
     For each high-level class, enumerate the key morphology concepts that \
     appear in slide patches, and those commonly confused with them, with the \
     magnifications at which each is best recognized.\n\n\
     Return a JSON array where each item has EXACTLY these fields:\n{SNAPSHOT_FIELDS}\n\n\
     Guidance:\n\
     - Keep wording concise and specific; positives and negatives are \
     patch-scale cues, not diagnoses.\n\
     - Cover compartments (stroma, lymphoid tissue, adipose tissue), \
     morphologies (tumor nests, necrosis) and interfaces (tumor-stroma interface).\n\
     - Include each high-level class itself with concept_type \"class\".\n\n\
     Return a STRICT JSON array only. No comments, no markdown, no trailing text."
  )
}
