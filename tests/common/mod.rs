//! Shared test harness: in-memory implementations of the two identity
//! seams plus a resolver/server builder.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::broadcast;

use classhub::auth::directory::{NewStudent, StudentDirectory, StudentProfileUpdate};
use classhub::auth::session::{Profile, Role, StudentAccount, StudentProfile};
use classhub::auth::{AuthError, LoginFlow, LoginPolicy, ResolverOptions, SessionResolver};
use classhub::backend::platform::{AuthChange, PlatformAuth, PlatformSession};
use classhub::backend::BackendError;
use classhub::credentials;
use classhub::retry::RetryPolicy;

/// In-memory platform identity provider.
///
/// The token cache is shared through the Arc, so building a second resolver
/// over the same fake behaves like a process restart with the provider's
/// token storage intact.
pub struct FakePlatformAuth {
    /// email -> (password, user_id)
    accounts: Mutex<HashMap<String, (String, String)>>,
    /// Simulates the provider's persisted token storage.
    cached_user: Mutex<Option<String>>,
    pub sign_in_calls: AtomicU32,
    /// When non-zero, the next sign-in attempts fail with a connection error.
    pub transient_failures: AtomicU32,
    events: broadcast::Sender<AuthChange>,
}

impl FakePlatformAuth {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            cached_user: Mutex::new(None),
            sign_in_calls: AtomicU32::new(0),
            transient_failures: AtomicU32::new(0),
            events: broadcast::channel(16).0,
        }
    }

    pub fn register_teacher(&self, email: &str, password: &str, user_id: &str) {
        self.accounts
            .lock()
            .unwrap()
            .insert(email.to_string(), (password.to_string(), user_id.to_string()));
    }

    /// Simulate a provider-side notification (another tab, token refresh).
    pub fn emit(&self, change: AuthChange) {
        let _ = self.events.send(change);
    }

    fn session_for(&self, email: &str, user_id: &str) -> PlatformSession {
        PlatformSession {
            user_id: user_id.to_string(),
            email: email.to_string(),
            access_token: format!("access-{user_id}"),
            refresh_token: Some(format!("refresh-{user_id}")),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        }
    }
}

#[async_trait]
impl PlatformAuth for FakePlatformAuth {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<PlatformSession, AuthError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);

        if self.transient_failures.load(Ordering::SeqCst) > 0 {
            self.transient_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(AuthError::Backend(BackendError::Connection(
                "connection refused".to_string(),
            )));
        }

        let accounts = self.accounts.lock().unwrap();
        match accounts.get(email) {
            Some((stored, user_id)) if stored == password => {
                let session = self.session_for(email, user_id);
                *self.cached_user.lock().unwrap() = Some(email.to_string());
                let _ = self.events.send(AuthChange::SignedIn(session.clone()));
                Ok(session)
            }
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    async fn restore_session(&self) -> Result<Option<PlatformSession>, AuthError> {
        let cached = self.cached_user.lock().unwrap().clone();
        let Some(email) = cached else {
            return Ok(None);
        };
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts
            .get(&email)
            .map(|(_, user_id)| self.session_for(&email, user_id)))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *self.cached_user.lock().unwrap() = None;
        let _ = self.events.send(AuthChange::SignedOut);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

struct StudentRecord {
    account: StudentAccount,
    profile: Profile,
    student: StudentProfile,
}

/// In-memory application credential store.
pub struct FakeStudentDirectory {
    students: Mutex<Vec<StudentRecord>>,
    teacher_profiles: Mutex<Vec<Profile>>,
}

impl FakeStudentDirectory {
    pub fn new() -> Self {
        Self {
            students: Mutex::new(Vec::new()),
            teacher_profiles: Mutex::new(Vec::new()),
        }
    }

    pub fn seed_teacher_profile(&self, user_id: &str, email: &str, full_name: &str) {
        self.teacher_profiles.lock().unwrap().push(Profile {
            id: user_id.to_string(),
            email: email.to_string(),
            full_name: full_name.to_string(),
            role: Role::Teacher,
        });
    }

    pub fn seed_student(
        &self,
        user_id: &str,
        email: &str,
        password: &str,
        full_name: &str,
        birth_date: NaiveDate,
        is_active: bool,
    ) {
        let mut students = self.students.lock().unwrap();
        let sequence = students.len();
        students.push(StudentRecord {
            account: StudentAccount {
                id: user_id.to_string(),
                email: email.to_string(),
                password_hash: credentials::hash_password(password).unwrap(),
                is_active,
                reset_token: None,
                reset_token_expiry: None,
            },
            profile: Profile {
                id: user_id.to_string(),
                email: email.to_string(),
                full_name: full_name.to_string(),
                role: Role::Student,
            },
            student: StudentProfile {
                student_id: format!("S2025{sequence:06}"),
                birth_date,
                phone: None,
                address: None,
            },
        });
    }

    /// Read the stored reset token, as a mail dispatcher would.
    pub fn reset_token_of(&self, email: &str) -> Option<String> {
        self.students
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.account.email == email)
            .and_then(|r| r.account.reset_token.clone())
    }

    /// Force a token expiry, for expiration tests.
    pub fn expire_reset_token(&self, email: &str, expiry: DateTime<Utc>) {
        let mut students = self.students.lock().unwrap();
        if let Some(record) = students.iter_mut().find(|r| r.account.email == email) {
            record.account.reset_token_expiry = Some(expiry);
        }
    }

    pub fn student_count(&self) -> usize {
        self.students.lock().unwrap().len()
    }
}

#[async_trait]
impl StudentDirectory for FakeStudentDirectory {
    async fn find_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<StudentAccount>, AuthError> {
        Ok(self
            .students
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.account.email == email)
            .map(|r| r.account.clone()))
    }

    async fn find_account_by_id(&self, id: &str) -> Result<Option<StudentAccount>, AuthError> {
        Ok(self
            .students
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.account.id == id)
            .map(|r| r.account.clone()))
    }

    async fn find_account_by_reset_token(
        &self,
        token: &str,
    ) -> Result<Option<StudentAccount>, AuthError> {
        Ok(self
            .students
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.account.reset_token.as_deref() == Some(token))
            .map(|r| r.account.clone()))
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, AuthError> {
        if let Some(profile) = self
            .teacher_profiles
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == user_id)
        {
            return Ok(Some(profile.clone()));
        }
        Ok(self
            .students
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.profile.id == user_id)
            .map(|r| r.profile.clone()))
    }

    async fn fetch_student_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<StudentProfile>, AuthError> {
        Ok(self
            .students
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.account.id == user_id)
            .map(|r| r.student.clone()))
    }

    async fn create_account(&self, new: &NewStudent) -> Result<(), AuthError> {
        self.students.lock().unwrap().push(StudentRecord {
            account: StudentAccount {
                id: new.id.clone(),
                email: new.email.clone(),
                password_hash: new.password_hash.clone(),
                is_active: true,
                reset_token: None,
                reset_token_expiry: None,
            },
            profile: Profile {
                id: new.id.clone(),
                email: new.email.clone(),
                full_name: new.full_name.clone(),
                role: Role::Student,
            },
            student: StudentProfile {
                student_id: new.student_id.clone(),
                birth_date: new.birth_date,
                phone: new.phone.clone(),
                address: new.address.clone(),
            },
        });
        Ok(())
    }

    async fn update_password_hash(
        &self,
        account_id: &str,
        password_hash: &str,
    ) -> Result<(), AuthError> {
        let mut students = self.students.lock().unwrap();
        let record = students
            .iter_mut()
            .find(|r| r.account.id == account_id)
            .ok_or(AuthError::NotFound)?;
        record.account.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn set_reset_token(
        &self,
        account_id: &str,
        token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let mut students = self.students.lock().unwrap();
        let record = students
            .iter_mut()
            .find(|r| r.account.id == account_id)
            .ok_or(AuthError::NotFound)?;
        record.account.reset_token = Some(token.to_string());
        record.account.reset_token_expiry = Some(expiry);
        Ok(())
    }

    async fn clear_reset_token(&self, account_id: &str) -> Result<(), AuthError> {
        let mut students = self.students.lock().unwrap();
        let record = students
            .iter_mut()
            .find(|r| r.account.id == account_id)
            .ok_or(AuthError::NotFound)?;
        record.account.reset_token = None;
        record.account.reset_token_expiry = None;
        Ok(())
    }

    async fn apply_profile_update<'a>(
        &self,
        account_id: &str,
        update: &StudentProfileUpdate,
        password_hash: Option<&'a str>,
    ) -> Result<(), AuthError> {
        let mut students = self.students.lock().unwrap();
        let record = students
            .iter_mut()
            .find(|r| r.account.id == account_id)
            .ok_or(AuthError::NotFound)?;

        if let Some(email) = &update.email {
            record.account.email = email.clone();
            record.profile.email = email.clone();
        }
        if let Some(hash) = password_hash {
            record.account.password_hash = hash.to_string();
        }
        if let Some(full_name) = &update.full_name {
            record.profile.full_name = full_name.clone();
        }
        if let Some(phone) = &update.phone {
            record.student.phone = Some(phone.clone());
        }
        if let Some(address) = &update.address {
            record.student.address = Some(address.clone());
        }
        Ok(())
    }
}

/// A resolver over fresh fakes, with common fixtures seeded.
pub struct Harness {
    pub platform: Arc<FakePlatformAuth>,
    pub directory: Arc<FakeStudentDirectory>,
    pub resolver: Arc<SessionResolver>,
}

pub const TEACHER_EMAIL: &str = "bu.sari@sekolah.sch.id";
pub const TEACHER_PASSWORD: &str = "rahasia-guru";
pub const TEACHER_ID: &str = "11111111-0000-0000-0000-000000000001";

pub const STUDENT_EMAIL: &str = "s2025000001@student.test";
pub const STUDENT_PASSWORD: &str = "15082005";
pub const STUDENT_ID: &str = "22222222-0000-0000-0000-000000000001";

pub fn student_birth_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2005, 8, 15).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        let platform = Arc::new(FakePlatformAuth::new());
        let directory = Arc::new(FakeStudentDirectory::new());

        platform.register_teacher(TEACHER_EMAIL, TEACHER_PASSWORD, TEACHER_ID);
        directory.seed_teacher_profile(TEACHER_ID, TEACHER_EMAIL, "Bu Sari");
        directory.seed_student(
            STUDENT_ID,
            STUDENT_EMAIL,
            STUDENT_PASSWORD,
            "Andi Wijaya",
            student_birth_date(),
            true,
        );

        let resolver = Self::resolver_over(&platform, &directory);
        Self {
            platform,
            directory,
            resolver,
        }
    }

    fn resolver_over(
        platform: &Arc<FakePlatformAuth>,
        directory: &Arc<FakeStudentDirectory>,
    ) -> Arc<SessionResolver> {
        Arc::new(SessionResolver::new(
            Arc::clone(platform) as Arc<dyn PlatformAuth>,
            Arc::clone(directory) as Arc<dyn StudentDirectory>,
            ResolverOptions {
                op_timeout: std::time::Duration::from_secs(2),
                retry: RetryPolicy {
                    max_attempts: 2,
                    base_delay: std::time::Duration::from_millis(10),
                    max_delay: std::time::Duration::from_millis(50),
                    backoff_factor: 2.0,
                },
            },
        ))
    }

    /// A new resolver over the same backing stores: everything a process
    /// restart keeps (provider token cache, backend rows) survives,
    /// everything in-memory (the resolver's own session) does not.
    pub fn restart(&self) -> Arc<SessionResolver> {
        Self::resolver_over(&self.platform, &self.directory)
    }

    pub fn login_flow(&self, policy: LoginPolicy) -> LoginFlow {
        LoginFlow::new(Arc::clone(&self.resolver), policy)
    }
}

/// A full HTTP app over the in-memory fakes, served on an OS-assigned port.
pub struct TestApp {
    pub base_url: String,
    pub harness: Harness,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn spawn() -> anyhow::Result<Self> {
        let harness = Harness::new();

        // The real backend client is wired but unused by these routes; the
        // identity seams are the fakes.
        let config = classhub::Config::test_config("http://127.0.0.1:1");
        let backend = Arc::new(classhub::BackendClient::from_config(&config)?);
        let state = classhub::AppState {
            config,
            backend,
            directory: Arc::clone(&harness.directory) as Arc<dyn StudentDirectory>,
            resolver: Arc::clone(&harness.resolver),
            login: Arc::new(LoginFlow::new(
                Arc::clone(&harness.resolver),
                LoginPolicy::default(),
            )),
        };

        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        let app = classhub::build_router(state);
        tokio::spawn(async move {
            let _ = axum_server::from_tcp(listener)
                .expect("bind tcp listener")
                .serve(app.into_make_service())
                .await;
        });

        // Redirects stay visible to the tests; the guard's decisions are the
        // thing under test.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            base_url: format!("http://127.0.0.1:{port}"),
            harness,
            client,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}
