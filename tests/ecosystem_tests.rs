//! Tests that load the `upsend` development-server ecosystem file and
//! verify the launch record it describes.

use ecolaunch::config::{Config, ConfigFormat, ExecMode};
use pretty_assertions::assert_eq;

const TOML_FIXTURE: &str = include_str!("fixtures/ecosystem.toml");
const JSON_FIXTURE: &str = include_str!("fixtures/ecosystem.json");

fn fixtures() -> Vec<Config> {
    vec![
        Config::from_toml_str(TOML_FIXTURE).expect("Failed to parse TOML fixture"),
        Config::from_json_str(JSON_FIXTURE).expect("Failed to parse JSON fixture"),
    ]
}

/// Both formats describe exactly one app, named `upsend`.
#[test]
fn yields_a_single_upsend_app() {
    for config in fixtures() {
        assert_eq!(1, config.apps.len());
        assert_eq!("upsend", config.apps[0].name);
        assert_eq!("npx", config.apps[0].command);
        assert!(config.validate().is_ok());
    }
}

/// The argument line is kept verbatim and splits into the emulator
/// bindings and the bind address, in order.
#[test]
fn preserves_argument_line_and_flag_order() {
    for config in fixtures() {
        let app = &config.apps[0];
        assert_eq!(
            "wrangler pages dev dist --d1=upsend-production --r2=IMAGES --local --ip 0.0.0.0 --port 3000",
            app.arguments
        );

        assert_eq!(
            vec![
                "wrangler",
                "pages",
                "dev",
                "dist",
                "--d1=upsend-production",
                "--r2=IMAGES",
                "--local",
                "--ip",
                "0.0.0.0",
                "--port",
                "3000",
            ],
            app.argv().unwrap()
        );
    }
}

/// `PORT` is a string in the environment and agrees with `--port`.
#[test]
fn port_env_matches_port_flag() {
    for config in fixtures() {
        let app = &config.apps[0];
        assert_eq!("3000", app.environment["PORT"]);
        assert_eq!("development", app.environment["NODE_ENV"]);
        assert_eq!(2, app.environment.len());
        assert_eq!(Some(String::from("3000")), app.port_flag().unwrap());
        assert_eq!(
            app.env_port().map(|port| port.parse::<u16>().unwrap()),
            app.port_flag()
                .unwrap()
                .map(|port| port.parse::<u16>().unwrap())
        );
    }
}

/// File watching is off and a single forked instance is requested.
#[test]
fn runs_one_forked_instance_without_watching() {
    for config in fixtures() {
        let app = &config.apps[0];
        assert!(!app.watch);
        assert_eq!(1, app.instances);
        assert_eq!(ExecMode::Fork, app.exec_mode);
    }
}

/// The TOML and JSON forms describe the same configuration.
#[test]
fn formats_agree() {
    let configs = fixtures();
    assert_eq!(configs[0], configs[1]);
}

/// Dumping the canonical JSON file reproduces it byte for byte.
#[test]
fn json_dump_reproduces_canonical_file() {
    let config = Config::from_json_str(JSON_FIXTURE).unwrap();
    assert_eq!(JSON_FIXTURE, config.dump(ConfigFormat::Json).unwrap());
}

/// Loading and dumping is idempotent in both formats: the first dump is
/// canonical, and dumping it again changes nothing.
#[test]
fn load_dump_is_idempotent() {
    for format in [ConfigFormat::Toml, ConfigFormat::Json] {
        let original = Config::from_toml_str(TOML_FIXTURE).unwrap();

        let first = original.dump(format).unwrap();
        let reloaded = Config::parse(&first, format).unwrap();
        assert_eq!(original, reloaded);

        let second = reloaded.dump(format).unwrap();
        assert_eq!(first, second);
    }
}

/// Optional settings that were never written are not written on dump
/// either, while the explicit flags always are.
#[test]
fn dump_only_writes_explicit_settings() {
    let config = Config::from_toml_str(TOML_FIXTURE).unwrap();
    let toml = config.to_toml_string().unwrap();

    for key in ["watch = false", "instances = 1", "exec_mode = \"fork\"", "PORT = \"3000\""] {
        assert!(toml.contains(key), "{key:?} missing from:\n{toml}");
    }

    for key in ["autorestart", "max_restarts", "kill_signal", "cwd", "user"] {
        assert!(!toml.contains(key), "{key:?} unexpectedly in:\n{toml}");
    }
}

/// The format is picked from the file extension when loading.
#[tokio::test]
async fn loads_by_extension() {
    let dir = tempfile::TempDir::new().unwrap();

    let toml_path = dir.path().join("ecosystem.toml");
    tokio::fs::write(&toml_path, TOML_FIXTURE).await.unwrap();
    let json_path = dir.path().join("ecosystem.json");
    tokio::fs::write(&json_path, JSON_FIXTURE).await.unwrap();

    assert_eq!(
        Config::load(&toml_path).await.unwrap(),
        Config::load(&json_path).await.unwrap()
    );

    assert!(Config::load(dir.path().join("missing.toml")).await.is_err());
}
