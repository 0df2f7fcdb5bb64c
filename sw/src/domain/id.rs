//! Task ID generation
//!
//! All IDs use the format: `{6-char-hex}-{type}-{slug}`
//! Example: `019430-task-add-oauth`

/// Longest slug kept in a generated ID
const MAX_SLUG_LEN: usize = 48;

/// Generate a domain ID from type and title
pub fn generate_id(domain_type: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.simple().to_string()[..6];
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{}-{}", hex_prefix, domain_type)
    } else {
        format!("{}-{}-{}", hex_prefix, domain_type, slug)
    }
}

/// Slugify a title for use in IDs
pub fn slugify(title: &str) -> String {
    let slug = title
        .to_lowercase()
        .chars()
        // Strip apostrophes entirely, replace other non-alphanumeric with hyphens
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if slug.len() <= MAX_SLUG_LEN {
        return slug;
    }

    // Cut on a word boundary so the slug never ends in a partial word
    let cut = &slug[..MAX_SLUG_LEN];
    match cut.rfind('-') {
        Some(pos) if pos > 0 => cut[..pos].to_string(),
        _ => cut.to_string(),
    }
}
