use lazy_static::lazy_static;
use regex::Regex;
use time::{format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime};

use crate::{
    auth::dto::{LoginRequest, RegisterForm},
    error::FieldErrors,
};

pub const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=20;
pub const PASSWORD_LEN: std::ops::RangeInclusive<usize> = 6..=128;
pub const MIN_AGE_YEARS: i32 = 6;
pub const MAX_AGE_YEARS: i32 = 110;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_name(name: &str) -> bool {
    lazy_static! {
        static ref NAME_RE: Regex = Regex::new(r"^[\p{L}\s]+$").unwrap();
    }
    NAME_RE.is_match(name)
}

/// Registration fields after validation and normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRegistration {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    /// Lowercased.
    pub email: String,
    pub password: String,
    pub date_of_birth: Date,
    pub accepts_publicity: bool,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn parse_birth_date(raw: &str) -> Option<Date> {
    let raw = raw.trim();
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .ok()
        .or_else(|| OffsetDateTime::parse(raw, &Rfc3339).ok().map(|dt| dt.date()))
}

/// Same calendar day `years` earlier; 29 February falls back to the 28th.
pub fn years_before(date: Date, years: i32) -> Date {
    let year = date.year() - years;
    Date::from_calendar_date(year, date.month(), date.day())
        .or_else(|_| Date::from_calendar_date(year, date.month(), date.day() - 1))
        .unwrap_or(date)
}

pub fn birth_date_in_range(dob: Date, today: Date) -> bool {
    let earliest = years_before(today, MAX_AGE_YEARS);
    let latest = years_before(today, MIN_AGE_YEARS);
    (earliest..=latest).contains(&dob)
}

/// Checkbox semantics: anything sent other than an explicit "off" value counts as consent.
pub fn parse_consent(raw: Option<&str>) -> bool {
    match raw.map(|v| v.trim().to_ascii_lowercase()) {
        None => false,
        Some(v) => !(v.is_empty() || v == "false" || v == "0" || v == "off"),
    }
}

pub fn validate_registration(
    form: &RegisterForm,
    has_picture: bool,
    today: Date,
) -> Result<ValidRegistration, FieldErrors> {
    let (
        Some(first_name),
        Some(last_name),
        Some(username),
        Some(email),
        Some(password),
        Some(confirm_password),
        Some(date_of_birth),
        true,
    ) = (
        present(&form.first_name),
        present(&form.last_name),
        present(&form.username),
        present(&form.email),
        form.password.as_deref().filter(|p| !p.is_empty()),
        form.confirm_password.as_deref().filter(|p| !p.is_empty()),
        present(&form.date_of_birth),
        has_picture,
    )
    else {
        return Err(FieldErrors::single(
            "general",
            "Some required fields are missing.",
        ));
    };

    let mut errors = FieldErrors::new();

    if !is_valid_name(first_name) {
        errors.push("firstName", "The first name may only contain letters and spaces.");
    }
    if !is_valid_name(last_name) {
        errors.push("lastName", "The last name may only contain letters and spaces.");
    }

    if !USERNAME_LEN.contains(&username.chars().count()) {
        errors.push(
            "username",
            format!(
                "The username must be between {} and {} characters long.",
                USERNAME_LEN.start(),
                USERNAME_LEN.end()
            ),
        );
    }

    if !is_valid_email(email) {
        errors.push("email", "Please enter a valid email address.");
    } else if present(&form.confirm_email) != Some(email) {
        errors.push("confirmEmail", "The email addresses do not match.");
    }

    if !PASSWORD_LEN.contains(&password.chars().count()) {
        errors.push(
            "password",
            format!(
                "The password must be between {} and {} characters long.",
                PASSWORD_LEN.start(),
                PASSWORD_LEN.end()
            ),
        );
    } else if password != confirm_password {
        errors.push("confirmPassword", "The passwords do not match.");
    }

    let dob = parse_birth_date(date_of_birth).filter(|d| birth_date_in_range(*d, today));
    if dob.is_none() {
        errors.push("dateOfBirth", "The date of birth is not valid.");
    }

    match dob {
        Some(date_of_birth) if errors.is_empty() => Ok(ValidRegistration {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            username: username.to_string(),
            email: email.to_lowercase(),
            password: password.to_string(),
            date_of_birth,
            accepts_publicity: parse_consent(form.accepts_publicity.as_deref()),
        }),
        _ => Err(errors),
    }
}

/// Returns the trimmed identifier and the password.
pub fn validate_login(req: &LoginRequest) -> Result<(&str, &str), FieldErrors> {
    let identifier = present(&req.login_identifier);
    let password = req.password.as_deref().filter(|p| !p.is_empty());
    let mut errors = FieldErrors::new();
    if identifier.is_none() {
        errors.push("loginIdentifier", "The username or email field is required.");
    }
    if password.is_none() {
        errors.push("password", "The password field is required.");
    }
    match (identifier, password) {
        (Some(identifier), Some(password)) => Ok((identifier, password)),
        _ => Err(errors),
    }
}
