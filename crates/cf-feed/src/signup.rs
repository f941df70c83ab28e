//! Sign-up and sign-in form checks, and school lookup by email domain.

use cf_core::error::{Field, Reason, Result, ValidationError};
use cf_core::models::School;
use cf_core::paths;
use cf_core::traits::{DocumentStore, Filter};

pub const PASSWORD_MIN_CHARS: usize = 8;

type Checked = std::result::Result<(), ValidationError>;

fn flag(field: Field, reason: Reason) -> Checked {
    Err(ValidationError::new(field, reason))
}

/// The part after `@`, if the address has the basic `local@domain.tld` shape.
pub fn email_domain(email: &str) -> Option<&str> {
    let (local, domain) = email.trim().split_once('@')?;
    let well_formed = !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.');
    well_formed.then_some(domain)
}

fn check_email(email: &str) -> Checked {
    if email.trim().is_empty() {
        return flag(Field::Email, Reason::Missing);
    }
    if email_domain(email).is_none() {
        return flag(Field::Email, Reason::InvalidEmail);
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct SignupForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub retype_password: String,
}

impl SignupForm {
    /// Username, email, password, retyped password; first failure wins.
    pub fn validate(&self) -> Checked {
        if self.username.trim().is_empty() {
            return flag(Field::Username, Reason::Missing);
        }
        check_email(&self.email)?;
        let college = email_domain(&self.email)
            .is_some_and(|domain| domain.to_ascii_lowercase().ends_with(".edu"));
        if !college {
            return flag(Field::Email, Reason::NotCollegeEmail);
        }
        if self.password.is_empty() {
            return flag(Field::Password, Reason::Missing);
        }
        if self.password.chars().count() < PASSWORD_MIN_CHARS {
            return flag(
                Field::Password,
                Reason::TooShort {
                    min: PASSWORD_MIN_CHARS,
                },
            );
        }
        if self.retype_password.is_empty() {
            return flag(Field::RetypePassword, Reason::Missing);
        }
        if self.retype_password != self.password {
            return flag(Field::RetypePassword, Reason::Mismatch);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SigninForm {
    pub email: String,
    pub password: String,
}

impl SigninForm {
    pub fn validate(&self) -> Checked {
        check_email(&self.email)?;
        if self.password.is_empty() {
            return flag(Field::Password, Reason::Missing);
        }
        Ok(())
    }
}

/// The school whose mail domain matches the email's domain.
pub async fn resolve_school<S>(store: &S, email: &str) -> Result<School>
where
    S: DocumentStore + ?Sized,
{
    let domain = email_domain(email)
        .ok_or_else(|| ValidationError::new(Field::Email, Reason::InvalidEmail))?
        .to_ascii_lowercase();
    let found = store
        .read_many(&paths::schools(), Some(Filter::field_eq("email", domain.as_str())))
        .await?;
    let Some(doc) = found.first() else {
        tracing::debug!(%domain, "no school for domain");
        return Err(ValidationError::new(Field::Email, Reason::UnknownSchool).into());
    };
    let mut school: School = doc.decode()?;
    school.id = doc.id.clone();
    Ok(school)
}
