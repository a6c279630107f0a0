use crate::models::ClauseKind;

pub const NOT_FOUND_MARKER: &str = "Not found in contract";

const REPAIR_PREVIOUS_LIMIT: usize = 2_000;

const WORKED_EXAMPLES: &str = r#"Example contract:
"Either party may end this Agreement by giving sixty (60) days prior written notice. The Supplier may terminate immediately if the Customer fails to pay any invoice within 45 days."

Example answer:
{"termination_clause": "Either party may end this Agreement by giving sixty (60) days prior written notice. The Supplier may terminate immediately if the Customer fails to pay any invoice within 45 days.", "confidentiality_clause": null, "liability_clause": null, "summary": "A supply agreement terminable on sixty days notice, with an immediate termination right for late payment."}

Example contract:
"Recipient shall keep the Disclosing Party's trade secrets confidential for three (3) years. In no event shall either party's aggregate liability exceed the amounts paid in the prior twelve months."

Example answer:
{"termination_clause": null, "confidentiality_clause": "Recipient shall keep the Disclosing Party's trade secrets confidential for three (3) years.", "liability_clause": "In no event shall either party's aggregate liability exceed the amounts paid in the prior twelve months.", "summary": "A disclosure agreement protecting trade secrets for three years and capping liability at twelve months of fees."}
"#;

fn schema_block() -> String {
    let clauses = ClauseKind::ALL
        .iter()
        .map(|kind| format!("  \"{}\": string or null", kind.response_key()))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("{{\n{clauses},\n  \"summary\": string\n}}")
}

pub fn extraction_prompt(contract_text: &str, few_shot: bool) -> String {
    let mut prompt = String::from(
        "You are a legal contract analyst. Read the contract below and extract:\n\
         1. termination_clause: how and when the contract can be terminated, notice periods and termination rights.\n\
         2. confidentiality_clause: confidential information, non-disclosure obligations and protection of proprietary information.\n\
         3. liability_clause: limitations of liability, indemnification, liability caps and allocation of risk.\n\
         4. summary: 100 to 150 words covering the purpose of the agreement, the key obligations of each party and notable risks or penalties.\n\n\
         Copy clause text verbatim from the contract. Use null for a clause that the contract does not contain.\n\n",
    );

    if few_shot {
        prompt.push_str(WORKED_EXAMPLES);
        prompt.push('\n');
    }

    prompt.push_str("Contract text:\n");
    prompt.push_str(contract_text);
    prompt.push_str("\n\nRespond with exactly one JSON object of this shape and nothing else:\n");
    prompt.push_str(&schema_block());
    prompt
}

pub fn repair_prompt(contract_text: &str, previous_response: &str, problem: &str) -> String {
    let previous: String = previous_response.chars().take(REPAIR_PREVIOUS_LIMIT).collect();
    format!(
        "Your previous answer could not be used: {problem}.\n\
         Previous answer:\n{previous}\n\n\
         Answer again for the same contract. Return only one JSON object with exactly these keys, \
         no markdown and no commentary:\n{schema}\n\n\
         Contract text:\n{contract_text}",
        schema = schema_block(),
    )
}
