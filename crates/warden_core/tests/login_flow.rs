use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use warden_core::{
    AccessStorage, AllowedClientHosts, AuthenticationData, Credentials, ErrorKind,
    ExternalAuthenticators, MemoryAccessStorage, SqliteAccessStorage, User,
};

struct CapturingLogger {
    records: Mutex<Vec<(String, Level, String)>>,
}

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        self.records.lock().push((
            record.target().to_string(),
            record.level(),
            record.args().to_string(),
        ));
    }

    fn flush(&self) {}
}

static LOGGER: Lazy<CapturingLogger> = Lazy::new(|| CapturingLogger {
    records: Mutex::new(Vec::new()),
});
static INSTALL: Once = Once::new();

fn install_logger() {
    INSTALL.call_once(|| {
        log::set_logger(&*LOGGER).expect("no other logger in this test binary");
        log::set_max_level(LevelFilter::Trace);
    });
}

/// Messages logged at `level` under `Access(<storage_name>)`.
fn captured(storage_name: &str, level: Level) -> Vec<String> {
    let target = format!("Access({storage_name})");
    LOGGER
        .records
        .lock()
        .iter()
        .filter(|(record_target, record_level, _)| *record_target == target && *record_level == level)
        .map(|(_, _, message)| message.clone())
        .collect()
}

fn address(value: &str) -> IpAddr {
    value.parse().unwrap()
}

fn office_only_user(name: &str, password: &str) -> User {
    let mut hosts = AllowedClientHosts::none();
    hosts.add_pattern("10.0.0.0/8").unwrap();
    User::new(name)
        .with_password(password)
        .with_allowed_hosts(hosts)
}

#[test]
fn successful_login_returns_the_user_id() {
    install_logger();
    let storage = MemoryAccessStorage::new("login_ok");
    let id = storage.insert(office_only_user("alice", "pw").into()).unwrap();

    let logged = storage
        .login(
            &Credentials::basic("alice", "pw"),
            address("10.1.2.3"),
            &ExternalAuthenticators::new(),
            true,
        )
        .unwrap();
    assert_eq!(logged, id);

    let infos = captured("login_ok", Level::Info);
    assert!(infos
        .iter()
        .any(|message| message.contains("event=login") && message.contains("status=ok")));
}

#[test]
fn specific_errors_without_generic_mode() {
    install_logger();
    let storage = MemoryAccessStorage::new("login_specific");
    storage.insert(office_only_user("alice", "pw").into()).unwrap();
    let external = ExternalAuthenticators::new();

    let missing = storage
        .login(&Credentials::basic("ghost", "pw"), address("10.0.0.1"), &external, false)
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
    assert_eq!(missing.to_string(), "There is no user `ghost` in login_specific");

    let wrong = storage
        .login(&Credentials::basic("alice", "nope"), address("10.0.0.1"), &external, false)
        .unwrap_err();
    assert_eq!(wrong.kind(), ErrorKind::WrongPassword);
    assert_eq!(wrong.to_string(), "Invalid credentials");

    let blocked = storage
        .login(&Credentials::basic("alice", "pw"), address("192.168.1.1"), &external, false)
        .unwrap_err();
    assert_eq!(blocked.kind(), ErrorKind::AddressNotAllowed);
    assert_eq!(
        blocked.to_string(),
        "Connections from 192.168.1.1 are not allowed"
    );
}

#[test]
fn generic_mode_hides_which_step_failed_but_logs_it() {
    install_logger();
    let storage = MemoryAccessStorage::new("login_generic");
    storage.insert(office_only_user("alice", "pw").into()).unwrap();
    let external = ExternalAuthenticators::new();

    let attempts = [
        (Credentials::basic("nobody", "pw"), address("10.0.0.1")),
        (Credentials::basic("alice", "wrong"), address("10.0.0.1")),
        (Credentials::basic("alice", "pw"), address("192.168.1.1")),
    ];
    let messages: Vec<String> = attempts
        .iter()
        .map(|(credentials, from)| {
            let err = storage.login(credentials, *from, &external, true).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
            err.to_string()
                .replacen(credentials.user_name(), "<user>", 1)
        })
        .collect();

    assert_eq!(
        messages[0],
        "<user>: Authentication failed: password is incorrect or there is no user with such name"
    );
    assert!(messages.iter().all(|message| *message == messages[0]));

    let warnings = captured("login_generic", Level::Warn);
    assert_eq!(warnings.len(), 3);
    assert!(warnings[0].contains("There is no user `nobody` in login_generic"));
    assert!(warnings[0].contains("from=10.0.0.1"));
    assert!(warnings[1].contains("Invalid credentials"));
    assert!(warnings[1].contains("user=alice"));
    assert!(warnings[2].contains("Connections from 192.168.1.1 are not allowed"));
    assert!(warnings.iter().all(|message| !message.contains("pw")));
}

#[test]
fn incomplete_credentials_never_reach_the_external_authenticator() {
    install_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut external = ExternalAuthenticators::new();
    external
        .register_ldap_server(
            "corp",
            Arc::new(move |_: &str, password: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
                password == "ldap-pw"
            }),
        )
        .unwrap();

    let storage = MemoryAccessStorage::new("login_ldap");
    let id = storage
        .insert(
            User::new("carol")
                .with_auth_data(AuthenticationData::Ldap {
                    server: "corp".to_string(),
                })
                .into(),
        )
        .unwrap();

    let err = storage
        .login(&Credentials::incomplete("carol"), address("::1"), &external, false)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WrongPassword);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let logged = storage
        .login(&Credentials::basic("carol", "ldap-pw"), address("::1"), &external, false)
        .unwrap();
    assert_eq!(logged, id);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn unreadable_user_is_reported_as_missing() {
    install_logger();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("access.db");
    {
        let storage = SqliteAccessStorage::open("login_corrupt", &path).unwrap();
        storage.insert(User::new("dave").into()).unwrap();
    }
    let conn = Connection::open(&path).unwrap();
    conn.execute(
        "UPDATE access_entities SET body = '{not json' WHERE name = 'dave';",
        [],
    )
    .unwrap();
    drop(conn);

    let storage = SqliteAccessStorage::open("login_corrupt", &path).unwrap();
    let err = storage
        .login(
            &Credentials::basic("dave", ""),
            address("127.0.0.1"),
            &ExternalAuthenticators::new(),
            false,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.to_string(), "There is no user `dave` in login_corrupt");
}
