// prompts.rs

pub const SYSTEM_PROMPT: &str = "Return accurate, structured data only.";

pub const MENU_PARSER_PROMPT: &str = r#"You are a precise menu parser. Extract menu items from the image(s).
Return ONLY JSON:
{
  "items": [
    { "item": "Latte", "size": "12 oz", "price": 4.25, "description": "Espresso with steamed milk", "currency": "USD" }
  ]
}
Rules:
- One row per size/price (split multi-size entries).
- Price must be a number (no currency symbol).
- Keep names concise; do not merge multiple items.
- Include description only if clearly tied to the item; else "".
- Currency "" if unknown."#;

/// Instruction for one batch of tiles. Later batches are told where they sit so the model
/// does not assume it is seeing the top of the page.
pub fn menu_parser_prompt(batch_index: usize, batch_count: usize) -> String {
    if batch_count <= 1 {
        return MENU_PARSER_PROMPT.to_string();
    }
    format!(
        "{}\n\nThese images are part {} of {} of one tall page, in top-to-bottom order.",
        MENU_PARSER_PROMPT,
        batch_index + 1,
        batch_count
    )
}
