use crate::constants::{MAX_BIO_CHARS, MAX_CODE_WORD_CHARS, MIN_INTERESTS};
use crate::error::ValidationError;
use crate::protocol::RegisterRequest;

/// Whitespace-separated word count. Empty or blank text has zero words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn validate_request_message(message: &str, max_words: usize) -> Result<(), ValidationError> {
    let words = word_count(message);
    if words > max_words {
        return Err(ValidationError::MessageTooLong {
            words,
            max: max_words,
        });
    }
    Ok(())
}

pub fn validate_code_word(code_word: &str) -> Result<(), ValidationError> {
    let len = code_word.trim().chars().count();
    if len > MAX_CODE_WORD_CHARS {
        return Err(ValidationError::CodeWordTooLong {
            len,
            max: MAX_CODE_WORD_CHARS,
        });
    }
    Ok(())
}

/// Trim, drop blanks and de-duplicate (case-insensitively), keeping the
/// first spelling seen.
pub fn normalize_interests(interests: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    interests
        .iter()
        .map(|i| i.trim())
        .filter(|i| !i.is_empty())
        .filter(|i| seen.insert(i.to_lowercase()))
        .map(str::to_string)
        .collect()
}

pub fn validate_email(email: &str, domain: &str) -> Result<(), ValidationError> {
    let email = email.trim();
    let domain = domain.trim_start_matches('@');
    let valid = match email.rsplit_once('@') {
        Some((local, host)) => !local.is_empty() && host.eq_ignore_ascii_case(domain),
        None => false,
    };

    if !valid {
        return Err(ValidationError::InvalidEmail {
            domain: domain.to_string(),
        });
    }
    Ok(())
}

pub fn validate_registration(req: &RegisterRequest, email_domain: &str) -> Result<(), ValidationError> {
    let required = [
        ("name", req.name.as_str()),
        ("username", req.username.as_str()),
        ("email", req.email.as_str()),
        ("password", req.password.as_str()),
        ("branch", req.branch.as_str()),
        ("bio", req.bio.as_str()),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(field));
        }
    }

    validate_email(&req.email, email_domain)?;

    if !(1..=4).contains(&req.year) {
        return Err(ValidationError::InvalidYear(req.year));
    }

    let bio_len = req.bio.chars().count();
    if bio_len > MAX_BIO_CHARS {
        return Err(ValidationError::BioTooLong {
            len: bio_len,
            max: MAX_BIO_CHARS,
        });
    }

    let interests = normalize_interests(&req.interests);
    if interests.len() < MIN_INTERESTS {
        return Err(ValidationError::TooFewInterests {
            got: interests.len(),
            min: MIN_INTERESTS,
        });
    }

    Ok(())
}
