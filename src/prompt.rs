//! Prompt assembly for the pricing/response assistant.
//!
//! The pricing rubric and tone rules are data, not code: they live in one
//! parameterized template plus a small table of per-variant constants. The
//! host never computes a price itself.

use crate::error::Error;
use crate::input::InquiryInput;

/// Constants that differ between prompt variants. Everything else in the
/// template is shared.
pub struct PromptVariant {
    pub name: &'static str,
    pub weekday_base: u32,
    pub weekend_base: u32,
    pub affluent_surcharge: u32,
    pub distance_rate: u32,
    pub wedding_multiplier: &'static str,
    pub corporate_multiplier: &'static str,
    /// Boilerplate paragraph appended after the shared template, if any.
    pub trailer: Option<&'static str>,
}

/// Selected by the caller's `promptType`. Index 0 is the default.
pub const VARIANTS: &[PromptVariant] = &[
    PromptVariant {
        name: "standard",
        weekday_base: 200,
        weekend_base: 250,
        affluent_surcharge: 100,
        distance_rate: 50,
        wedding_multiplier: "1.5",
        corporate_multiplier: "2.5-8 (based on company size)",
        trailer: None,
    },
    PromptVariant {
        name: "peak-season",
        weekday_base: 250,
        weekend_base: 300,
        affluent_surcharge: 150,
        distance_rate: 50,
        wedding_multiplier: "1.5",
        corporate_multiplier: "3-8 (based on company size)",
        trailer: Some(
            "Also mention that December and January weekends book out 4-6 weeks \
             ahead, so a deposit locks the date.",
        ),
    },
    PromptVariant {
        name: "referral",
        weekday_base: 200,
        weekend_base: 250,
        affluent_surcharge: 100,
        distance_rate: 50,
        wedding_multiplier: "1.5",
        corporate_multiplier: "2.5-8 (based on company size)",
        trailer: Some(
            "Close with a one-line referral offer: 10% commission for any booking \
             they send our way.",
        ),
    },
];

/// Look up a variant by the caller's `promptType`, defaulting to 0.
pub fn variant(prompt_type: Option<usize>) -> Result<&'static PromptVariant, Error> {
    let idx = prompt_type.unwrap_or(0);
    VARIANTS
        .get(idx)
        .ok_or_else(|| Error::Validation(format!("Unknown promptType: {}", idx)))
}

/// Assemble the full pricing instruction for one inquiry.
///
/// Byte-identical for identical (input kind, variant): no randomness, no
/// host-injected dates. Relative dates are resolved by the model itself,
/// per the template.
pub fn pricing_prompt(input: &InquiryInput, variant: &PromptVariant) -> String {
    let source_line = match input {
        InquiryInput::Image { .. } => "Analyze the attached image and extract:",
        InquiryInput::Text { .. } => "Analyze the inquiry text below and extract:",
    };

    let mut prompt = format!(
        r#"You are a pricing and response assistant for Julian, a top magician in Sydney.

{source_line}
- Customer name (if visible)
- Event type (wedding, corporate, kids, etc.)
- Date (weekday/weekend; resolve relative dates like "next Saturday" yourself)
- Location (suburb, city)
- Any other details (group size, special requests)

Then:
1. Calculate a price using:
   - Base: ${weekday} (weekday), ${weekend} (weekend)
   - +${affluent} for affluent suburbs (e.g., Northern Beaches, Sutherland Shire)
   - +${distance} per 50km from Sydney CBD (e.g., Wollongong = +${wollongong})
   - x{wedding} for weddings, x{corporate} for corporate
2. Generate a natural response (~60 tokens) starting with "Hi {{name}}," or "Hi,"
   - Mention: $XXX price for 45+ min show, need for headcount/suburb/time
   - Add follow-up questions and commission offer
   - Do NOT use "regards", "sincerely", placeholders, or markdown
3. Output JSON only:
   {{
     "price": 650,
     "message": "Hi Sarah,\n\nI'd love to perform..."
   }}"#,
        source_line = source_line,
        weekday = variant.weekday_base,
        weekend = variant.weekend_base,
        affluent = variant.affluent_surcharge,
        distance = variant.distance_rate,
        wollongong = variant.distance_rate * 2,
        wedding = variant.wedding_multiplier,
        corporate = variant.corporate_multiplier,
    );

    if let Some(trailer) = variant.trailer {
        prompt.push_str("\n\n");
        prompt.push_str(trailer);
    }

    if let InquiryInput::Text { content } = input {
        prompt.push_str("\n\nInquiry:\n");
        prompt.push_str(content);
    }

    prompt
}

/// Instruction for the lead-capture flow: structured records, array only.
pub const LEAD_EXTRACTION_PROMPT: &str = r#"Extract every distinct customer inquiry from the input as a lead record.

Return ONLY a JSON array, no prose, no markdown fences. Each element:
{
  "customer_name": "string or null",
  "email_address": "string or null",
  "phone_number": "string or null",
  "website": "string or null",
  "price": 0,
  "address": "string or null",
  "start_time": "ISO 8601 with timezone offset, or null",
  "end_time": "ISO 8601 with timezone offset, or null",
  "summary": "one sentence describing the inquiry"
}

Use null for anything not present in the input. Default price to 0. Resolve
relative dates like "this Friday" yourself, in the Australia/Sydney timezone.
If the input contains no leads, return []."#;

/// Assemble the lead-extraction instruction for one inquiry.
pub fn lead_prompt(input: &InquiryInput) -> String {
    match input {
        InquiryInput::Image { .. } => format!(
            "{}\n\nThe input is the attached image. Read all visible text first.",
            LEAD_EXTRACTION_PROMPT
        ),
        InquiryInput::Text { content } => {
            format!("{}\n\nInput:\n{}", LEAD_EXTRACTION_PROMPT, content)
        }
    }
}
