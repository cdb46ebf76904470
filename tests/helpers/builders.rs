use custodian::audit::Provenance;
use custodian::auth::Caller;
use custodian::categories::AcceptPayload;
use custodian::consent::{Consent, DataType};
use custodian::lifecycle::{ConsentRequest, ConsentService};
use custodian::storage::{self, NewUser, User};
use sea_orm::DatabaseConnection;
use serde_json::Value;

/// Builder for creating test users
pub struct UserBuilder {
    email: String,
    name: String,
    password: String,
    is_admin: bool,
    documents: Vec<(DataType, Value)>,
}

impl UserBuilder {
    pub fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            password: "password123".to_string(),
            is_admin: false,
            documents: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    pub fn with_document(mut self, data_type: DataType, doc: Value) -> Self {
        self.documents.push((data_type, doc));
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> User {
        let user = storage::create_user(
            db,
            &NewUser {
                name: self.name,
                email: self.email,
                password: self.password,
                is_admin: self.is_admin,
            },
            0,
        )
        .await
        .expect("Failed to create test user");

        for (data_type, doc) in &self.documents {
            storage::set_attribute(db, &user.subject, *data_type, doc, 0)
                .await
                .expect("Failed to store test document");
        }
        user
    }
}

/// Builder for consents, driven through the service so every row comes with
/// its audit trail.
pub struct ConsentBuilder {
    granter_email: String,
    data_types: Vec<String>,
    purpose: String,
    duration: Option<String>,
    expiration: Option<String>,
}

impl ConsentBuilder {
    pub fn new(granter_email: &str) -> Self {
        Self {
            granter_email: granter_email.to_string(),
            data_types: vec!["personal-info".to_string()],
            purpose: "demo".to_string(),
            duration: Some("1-month".to_string()),
            expiration: None,
        }
    }

    pub fn data_types(mut self, types: &[&str]) -> Self {
        self.data_types = types.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn purpose(mut self, purpose: &str) -> Self {
        self.purpose = purpose.to_string();
        self
    }

    pub fn duration(mut self, code: &str) -> Self {
        self.duration = Some(code.to_string());
        self
    }

    pub fn expires(mut self, at: &str) -> Self {
        self.expiration = Some(at.to_string());
        self
    }

    pub fn request(&self) -> ConsentRequest {
        ConsentRequest {
            granter_email: self.granter_email.clone(),
            data_types: self.data_types.clone(),
            purpose: self.purpose.clone(),
            duration: self.duration.clone(),
            expiration_date_time: self.expiration.clone(),
        }
    }

    /// Pending consent from `requester`
    pub async fn create(self, service: &ConsentService, requester: &Caller) -> Consent {
        service
            .request_consent(requester, self.request(), &Provenance::default())
            .await
            .expect("Failed to request consent")
    }

    /// Consent accepted by `granter`
    pub async fn create_active(
        self,
        service: &ConsentService,
        requester: &Caller,
        granter: &Caller,
    ) -> Consent {
        let consent = self.create(service, requester).await;
        service
            .accept(
                granter,
                &consent.id,
                &AcceptPayload::default(),
                &Provenance::default(),
            )
            .await
            .expect("Failed to accept consent")
    }
}
