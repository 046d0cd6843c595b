//! Lead extraction flow: delegate structured extraction to the completion
//! service, then sequence the results for storage.

use serde::Serialize;
use tracing::info;

use crate::decode::{decode_lead_array, LeadFields};
use crate::error::Error;
use crate::input::InquiryInput;
use crate::openai::CompletionGateway;
use crate::prompt;

/// An extracted lead, keyed for dedup by (customer_name, sequence_number)
/// within its batch.
#[derive(Debug, Clone, Serialize)]
pub struct LeadDraft {
    #[serde(flatten)]
    pub fields: LeadFields,
    pub sequence_number: i64,
}

impl LeadDraft {
    /// Dedup key half: the customer name, empty when the model omitted it.
    pub fn customer_name(&self) -> &str {
        self.fields.customer_name.as_deref().unwrap_or("")
    }
}

/// Ask the completion service for structured lead records and assign each a
/// 1-based sequence number in emission order.
pub async fn extract_leads(
    gateway: &dyn CompletionGateway,
    input: &InquiryInput,
) -> Result<Vec<LeadDraft>, Error> {
    let prompt = prompt::lead_prompt(input);
    let raw = gateway.complete(&prompt, input).await?;

    let fields = decode_lead_array(&raw)?;
    info!("Extracted {} lead(s)", fields.len());

    Ok(fields
        .into_iter()
        .zip(1i64..)
        .map(|(fields, sequence_number)| LeadDraft {
            fields,
            sequence_number,
        })
        .collect())
}
