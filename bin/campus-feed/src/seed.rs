//! Demo data for local runs against the in-process backends.

use cf_auth_memory::MemorySessionProvider;
use cf_core::models::Fields;
use cf_core::paths;
use cf_feed::signup::{resolve_school, SignupForm};
use cf_store_memory::MemoryStore;
use serde_json::{json, Value};

pub const DEMO_EMAIL: &str = "demo@campus.edu";
const DEMO_PASSWORD: &str = "campus-demo";

fn object(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

/// Seeds one school, registers a demo account through the sign-up checks
/// and marks its email verified. The provider reports the verification on
/// the next reload.
pub async fn demo_account(store: &MemoryStore, auth: &MemorySessionProvider) -> anyhow::Result<()> {
    store.seed(
        &paths::schools().doc("campus"),
        object(json!({ "name": "Campus University", "email": "campus.edu" })),
    );

    let form = SignupForm {
        username: "demo".into(),
        email: DEMO_EMAIL.into(),
        password: DEMO_PASSWORD.into(),
        retype_password: DEMO_PASSWORD.into(),
    };
    form.validate()?;
    let school = resolve_school(store, &form.email).await?;
    let identity = auth.sign_up(&form.email, &form.password)?;

    store.seed(
        &paths::user(&school.id, &identity.uid),
        object(json!({
            "uid": identity.uid,
            "firstName": "Demo",
            "lastName": "User",
            "username": form.username,
            "school": school.name,
        })),
    );
    auth.verify_email(&form.email)?;
    tracing::info!(uid = %identity.uid, school = %school.id, "demo account seeded");
    Ok(())
}
