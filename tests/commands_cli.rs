mod support;

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use clap::error::ErrorKind;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use support::{ACCOUNT, FakeCloud, FakeTerminalClient, PASSWORD, PRODUCT_KEY, PUMP_MODEL_JSON, TOKEN};

const PUMP_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn models() -> jebao::AttributeModelTable {
    let model = jebao::AttributeModel::from_json(PUMP_MODEL_JSON, Path::new("pump.json"))
        .expect("pump model should parse");
    jebao::AttributeModelTable::from_models([model])
}

fn context(dir: &Path, config: jebao::Config) -> jebao::AppContext {
    jebao::AppContext::new(dir.join("config.json"), config, models())
}

async fn run(
    command: jebao::Command,
    context: jebao::AppContext,
    output_format: jebao::OutputFormat,
) -> anyhow::Result<String> {
    let mut output = Vec::new();
    jebao::run_with_clients(
        command,
        context,
        &mut output,
        &FakeTerminalClient,
        output_format,
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

async fn pump() -> anyhow::Result<jebao::FakePump> {
    Ok(jebao::FakePump::spawn(
        jebao::FakePumpConfig::builder()
            .status_payload(vec![0x03, 0x41, 0x00])
            .build(),
    )
    .await?)
}

fn saved_config(path: &Path) -> anyhow::Result<jebao::Config> {
    Ok(jebao::Config::load(path)?)
}

fn config_path(dir: &Path) -> PathBuf {
    dir.join("config.json")
}

#[test]
fn control_requires_device_attribute_and_value() {
    let error = jebao::Args::try_parse_from(["jebao", "control", "did-1", "mode"])
        .expect_err("the value is missing");
    assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
}

#[test]
fn poll_interval_must_be_a_duration() {
    let error = jebao::Args::try_parse_from(["jebao", "poll", "--interval", "soon"])
        .expect_err("`soon` is not a duration");
    assert_eq!(ErrorKind::ValueValidation, error.kind());
}

#[tokio::test]
async fn status_prints_decoded_attributes() -> anyhow::Result<()> {
    let pump = pump().await?;
    let dir = tempfile::tempdir()?;
    let config = jebao::Config::builder()
        .devices(vec![
            jebao::Device::new("did-1", PRODUCT_KEY)
                .with_lan_ip(PUMP_IP)
                .with_alias("Reef return".to_string()),
        ])
        .build();
    let context = context(dir.path(), config).with_lan_port(pump.addr().port());

    let stdout = run(
        jebao::Command::Status(jebao::StatusArgs::new(None)),
        context,
        jebao::OutputFormat::Pretty,
    )
    .await?;

    assert!(stdout.contains("Reef return (did-1) fresh via lan"), "{stdout}");
    assert!(stdout.contains("wave"), "{stdout}");
    assert!(stdout.contains("65"), "{stdout}");
    Ok(())
}

#[tokio::test]
async fn status_json_reports_each_device() -> anyhow::Result<()> {
    let pump = pump().await?;
    let dir = tempfile::tempdir()?;
    let config = jebao::Config::builder()
        .devices(vec![
            jebao::Device::new("did-1", PRODUCT_KEY).with_lan_ip(PUMP_IP),
            jebao::Device::new("did-2", PRODUCT_KEY),
        ])
        .build();
    let context = context(dir.path(), config).with_lan_port(pump.addr().port());

    let stdout = run(
        jebao::Command::Status(jebao::StatusArgs::new(None)),
        context,
        jebao::OutputFormat::Json,
    )
    .await?;

    let lines: Value = serde_json::from_str(&stdout)?;
    assert_eq!(json!("wave"), lines[0]["attributes"]["mode"]);
    assert_eq!(json!(true), lines[0]["available"]);
    assert_eq!(json!(false), lines[1]["available"]);
    assert!(
        lines[1]["error"]
            .as_str()
            .is_some_and(|error| error.contains("no LAN address")),
        "{stdout}"
    );
    Ok(())
}

#[tokio::test]
async fn status_without_devices_points_at_setup() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;

    let error = run(
        jebao::Command::Status(jebao::StatusArgs::new(None)),
        context(dir.path(), jebao::Config::default()),
        jebao::OutputFormat::Pretty,
    )
    .await
    .expect_err("nothing is configured");

    assert!(format!("{error:#}").contains("jebao setup"));
    Ok(())
}

#[tokio::test]
async fn poll_stops_after_the_requested_cycles() -> anyhow::Result<()> {
    let pump = pump().await?;
    let dir = tempfile::tempdir()?;
    let config = jebao::Config::builder()
        .devices(vec![jebao::Device::new("did-1", PRODUCT_KEY).with_lan_ip(PUMP_IP)])
        .build();
    let context = context(dir.path(), config).with_lan_port(pump.addr().port());

    let stdout = run(
        jebao::Command::Poll(jebao::PollArgs::new(Some(Duration::from_millis(10)), Some(2))),
        context,
        jebao::OutputFormat::Pretty,
    )
    .await?;

    assert!(stdout.contains("Cycle 1"), "{stdout}");
    assert!(stdout.contains("Cycle 2"), "{stdout}");
    assert!(stdout.contains("Stopped: reached max cycles (2)"), "{stdout}");
    assert_eq!(2, pump.status_requests());
    Ok(())
}

#[tokio::test]
async fn discover_saves_addresses_of_configured_pumps() -> anyhow::Result<()> {
    let responder = jebao::FakeDiscoveryResponder::spawn(vec![
        jebao::discovery_response("did-1"),
        jebao::discovery_response("did-stranger"),
    ])
    .await?;
    let dir = tempfile::tempdir()?;
    let config = jebao::Config::builder()
        .devices(vec![jebao::Device::new("did-1", PRODUCT_KEY)])
        .build();
    let context = context(dir.path(), config).with_discovery_target(responder.addr());

    let stdout = run(
        jebao::Command::Discover(jebao::DiscoverArgs::new(Some(Duration::from_millis(300)), true)),
        context,
        jebao::OutputFormat::Json,
    )
    .await?;

    let result: Value = serde_json::from_str(&stdout)?;
    assert_eq!(json!(1), result["updated"]);
    assert_eq!(json!("did-stranger"), result["devices"][1]["did"]);
    assert_eq!(json!(false), result["devices"][1]["configured"]);
    let saved = saved_config(&config_path(dir.path()))?;
    assert_eq!(Some(PUMP_IP), saved.devices()[0].lan_ip());
    Ok(())
}

#[tokio::test]
async fn setup_logs_in_locates_pumps_and_writes_the_config() -> anyhow::Result<()> {
    let cloud = FakeCloud::builder()
        .binding("did-1", PRODUCT_KEY, "Reef return")
        .binding("did-9", "pk-unknown", "Skimmer")
        .spawn()
        .await?;
    let responder =
        jebao::FakeDiscoveryResponder::spawn(vec![jebao::discovery_response("did-1")]).await?;
    let dir = tempfile::tempdir()?;
    let context = context(dir.path(), jebao::Config::default())
        .with_cloud_endpoints(cloud.endpoints())
        .with_discovery_target(responder.addr());

    let stdout = run(
        jebao::Command::Setup(
            jebao::SetupArgs::new(ACCOUNT, PASSWORD, jebao::Region::Us)
                .with_window(Duration::from_millis(300)),
        ),
        context,
        jebao::OutputFormat::Json,
    )
    .await?;

    let result: Value = serde_json::from_str(&stdout)?;
    assert_eq!(json!("did-9"), result["unsupported"][0]["did"]);
    let saved = saved_config(&config_path(dir.path()))?;
    assert_eq!(Some(TOKEN), saved.token());
    assert_eq!(Some(ACCOUNT), saved.account());
    assert_eq!(jebao::Region::Us, saved.region());
    assert_eq!(1, saved.devices().len());
    assert_eq!(Some("Reef return"), saved.devices()[0].alias());
    assert_eq!(Some(PUMP_IP), saved.devices()[0].lan_ip());
    Ok(())
}

#[tokio::test]
async fn setup_again_keeps_stored_lan_addresses() -> anyhow::Result<()> {
    let stored_ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
    let cloud = FakeCloud::builder()
        .binding("did-1", PRODUCT_KEY, "Reef return")
        .spawn()
        .await?;
    let dir = tempfile::tempdir()?;
    let config = jebao::Config::builder()
        .devices(vec![jebao::Device::new("did-1", PRODUCT_KEY).with_lan_ip(stored_ip)])
        .build();
    let context = context(dir.path(), config).with_cloud_endpoints(cloud.endpoints());

    run(
        jebao::Command::Setup(
            jebao::SetupArgs::new(ACCOUNT, PASSWORD, jebao::Region::Eu).without_discovery(),
        ),
        context,
        jebao::OutputFormat::Json,
    )
    .await?;

    let saved = saved_config(&config_path(dir.path()))?;
    assert_eq!(Some(stored_ip), saved.devices()[0].lan_ip());
    assert_eq!(Some("Reef return"), saved.devices()[0].alias());
    Ok(())
}

#[tokio::test]
async fn setup_static_lan_address_wins_over_discovery() -> anyhow::Result<()> {
    let static_ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 8));
    let cloud = FakeCloud::builder()
        .binding("did-1", PRODUCT_KEY, "Reef return")
        .binding("did-2", PRODUCT_KEY, "Wavemaker")
        .spawn()
        .await?;
    let responder = jebao::FakeDiscoveryResponder::spawn(vec![
        jebao::discovery_response("did-1"),
        jebao::discovery_response("did-2"),
    ])
    .await?;
    let dir = tempfile::tempdir()?;
    let context = context(dir.path(), jebao::Config::default())
        .with_cloud_endpoints(cloud.endpoints())
        .with_discovery_target(responder.addr());

    let stdout = run(
        jebao::Command::Setup(
            jebao::SetupArgs::new(ACCOUNT, PASSWORD, jebao::Region::Eu)
                .with_window(Duration::from_millis(300))
                .with_lan_ip("did-1", static_ip),
        ),
        context,
        jebao::OutputFormat::Json,
    )
    .await?;

    let result: Value = serde_json::from_str(&stdout)?;
    assert_eq!(json!("10.0.0.8"), result["devices"][0]["lan_ip"]);
    let saved = saved_config(&config_path(dir.path()))?;
    assert_eq!(Some(static_ip), saved.device("did-1")?.lan_ip());
    assert_eq!(Some(PUMP_IP), saved.device("did-2")?.lan_ip());
    Ok(())
}

#[tokio::test]
async fn setup_rejects_static_addresses_for_unbound_pumps() -> anyhow::Result<()> {
    let cloud = FakeCloud::builder()
        .binding("did-1", PRODUCT_KEY, "Reef return")
        .spawn()
        .await?;
    let dir = tempfile::tempdir()?;
    let context =
        context(dir.path(), jebao::Config::default()).with_cloud_endpoints(cloud.endpoints());

    let error = run(
        jebao::Command::Setup(
            jebao::SetupArgs::new(ACCOUNT, PASSWORD, jebao::Region::Eu)
                .without_discovery()
                .with_lan_ip("did-404", PUMP_IP),
        ),
        context,
        jebao::OutputFormat::Json,
    )
    .await
    .expect_err("did-404 is not bound to the account");

    assert!(format!("{error:#}").contains("did-404"));
    assert!(!config_path(dir.path()).exists());
    Ok(())
}

#[tokio::test]
async fn setup_with_a_wrong_password_asks_to_retry() -> anyhow::Result<()> {
    let cloud = FakeCloud::builder().spawn().await?;
    let dir = tempfile::tempdir()?;
    let context =
        context(dir.path(), jebao::Config::default()).with_cloud_endpoints(cloud.endpoints());

    let error = run(
        jebao::Command::Setup(
            jebao::SetupArgs::new(ACCOUNT, "wrong", jebao::Region::Eu).without_discovery(),
        ),
        context,
        jebao::OutputFormat::Pretty,
    )
    .await
    .expect_err("the login is rejected");

    assert!(format!("{error:#}").contains("check the account and password"));
    assert!(!config_path(dir.path()).exists());
    Ok(())
}

#[tokio::test]
async fn devices_lists_cloud_bindings() -> anyhow::Result<()> {
    let cloud = FakeCloud::builder()
        .binding("did-1", PRODUCT_KEY, "Reef return")
        .spawn()
        .await?;
    let dir = tempfile::tempdir()?;
    let config = jebao::Config::builder().token(TOKEN.to_string()).build();
    let context = context(dir.path(), config).with_cloud_endpoints(cloud.endpoints());

    let stdout = run(jebao::Command::Devices, context, jebao::OutputFormat::Json).await?;

    let listings: Value = serde_json::from_str(&stdout)?;
    assert_eq!(json!("Reef return"), listings[0]["alias"]);
    assert_eq!(json!(true), listings[0]["supported"]);
    Ok(())
}

#[tokio::test]
async fn control_sends_enum_labels_through_the_cloud() -> anyhow::Result<()> {
    let cloud = FakeCloud::builder().spawn().await?;
    let dir = tempfile::tempdir()?;
    let config = jebao::Config::builder()
        .token(TOKEN.to_string())
        .devices(vec![jebao::Device::new("did-1", PRODUCT_KEY)])
        .build();
    let context = context(dir.path(), config).with_cloud_endpoints(cloud.endpoints());

    let stdout = run(
        jebao::Command::Control(jebao::ControlArgs::new("did-1", "mode", "2")),
        context,
        jebao::OutputFormat::Pretty,
    )
    .await?;

    assert_eq!("Set Mode on did-1 to random", stdout.trim_end());
    let controls = cloud.controls();
    assert_eq!(json!({ "attrs": { "mode": "random" } }), controls[0].body);
    Ok(())
}

#[tokio::test]
async fn control_rejects_read_only_attributes_before_sending() -> anyhow::Result<()> {
    let cloud = FakeCloud::builder().spawn().await?;
    let dir = tempfile::tempdir()?;
    let config = jebao::Config::builder()
        .token(TOKEN.to_string())
        .devices(vec![jebao::Device::new("did-1", PRODUCT_KEY)])
        .build();
    let context = context(dir.path(), config).with_cloud_endpoints(cloud.endpoints());

    let error = run(
        jebao::Command::Control(jebao::ControlArgs::new("did-1", "fault", "on")),
        context,
        jebao::OutputFormat::Pretty,
    )
    .await
    .expect_err("alerts cannot be written");

    assert!(format!("{error:#}").contains("read-only"));
    assert!(cloud.controls().is_empty());
    Ok(())
}
