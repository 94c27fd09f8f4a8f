use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use rstest::rstest;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn pump_model() -> jebao::AttributeModel {
    jebao::AttributeModel::new(
        "pk-pump",
        vec![
            jebao::AttributeDescriptor::new(
                "power",
                jebao::DataType::Bool,
                jebao::BitPosition::bits(0, 0, 1),
            ),
            jebao::AttributeDescriptor::new(
                "mode",
                jebao::DataType::Enum,
                jebao::BitPosition::bits(0, 1, 3),
            )
            .with_enum_values(["classic", "wave", "random"]),
            jebao::AttributeDescriptor::new(
                "speed",
                jebao::DataType::Uint8,
                jebao::BitPosition::bytes(1, 1),
            ),
        ],
    )
    .expect("pump model should validate")
}

fn client_for(pump: &jebao::FakePump) -> jebao::LanClient {
    jebao::LanClient::new(
        jebao::LanConfig::builder()
            .port(pump.addr().port())
            .connect_timeout(Duration::from_millis(500))
            .phase_timeout(Duration::from_millis(200))
            .build(),
    )
}

async fn spawn(config: jebao::FakePumpConfig) -> anyhow::Result<jebao::FakePump> {
    Ok(jebao::FakePump::spawn(config).await?)
}

#[rstest]
#[case::whole_frames(false, false)]
#[case::one_byte_at_a_time(true, false)]
#[case::with_unsolicited_frames(false, true)]
#[case::both(true, true)]
#[tokio::test]
async fn status_poll_decodes_the_matching_response(
    #[case] byte_by_byte: bool,
    #[case] unsolicited_before_status: bool,
) -> anyhow::Result<()> {
    let pump = spawn(
        jebao::FakePumpConfig::builder()
            .status_payload(vec![0x03, 0x41])
            .byte_by_byte(byte_by_byte)
            .unsolicited_before_status(unsolicited_before_status)
            .build(),
    )
    .await?;

    let snapshot = client_for(&pump)
        .poll("did-1", LOCALHOST, &pump_model())
        .await?;

    assert_eq!("did-1", snapshot.device_id());
    assert_eq!(jebao::StatusSourceKind::Lan, snapshot.source());
    assert_eq!(jebao::Freshness::Fresh, snapshot.freshness());
    assert_eq!(
        Some(&jebao::AttributeValue::Bool(true)),
        snapshot.attribute("power")
    );
    assert_eq!(
        Some(&jebao::AttributeValue::Enum(1)),
        snapshot.attribute("mode")
    );
    assert_eq!(
        Some(&jebao::AttributeValue::UInt8(0x41)),
        snapshot.attribute("speed")
    );
    Ok(())
}

#[tokio::test]
async fn pump_reporting_encoded_attributes_is_read_back() -> anyhow::Result<()> {
    let model = pump_model();
    let reported = jebao::AttributeMap::from([
        ("power".to_string(), jebao::AttributeValue::Bool(false)),
        ("mode".to_string(), jebao::AttributeValue::Enum(2)),
        ("speed".to_string(), jebao::AttributeValue::UInt8(80)),
    ]);
    let pump = spawn(
        jebao::FakePumpConfig::builder()
            .status_payload(jebao::AttributeCodec::encode(&model, &reported)?)
            .build(),
    )
    .await?;

    let snapshot = client_for(&pump).poll("did-1", LOCALHOST, &model).await?;

    assert_eq!(&reported, snapshot.attributes());
    Ok(())
}

#[tokio::test]
async fn rejected_login_is_an_auth_failure() -> anyhow::Result<()> {
    let pump = spawn(jebao::FakePumpConfig::builder().login_status(1).build()).await?;

    let error = client_for(&pump)
        .poll("did-1", LOCALHOST, &pump_model())
        .await
        .expect_err("login should be rejected");

    assert_matches!(error, jebao::LanError::LoginRejected { status: 1 });
    assert!(error.is_auth_failure());
    assert_eq!(0, pump.status_requests());
    Ok(())
}

#[rstest]
#[case::silent_passcode(jebao::FakePumpFault::SilentPasscode, jebao::LanPhase::AwaitPasscode)]
#[case::silent_status(jebao::FakePumpFault::SilentStatus, jebao::LanPhase::AwaitStatusResponse)]
#[tokio::test]
async fn silent_pump_times_out_in_the_waiting_phase(
    #[case] fault: jebao::FakePumpFault,
    #[case] phase: jebao::LanPhase,
) -> anyhow::Result<()> {
    let pump = spawn(jebao::FakePumpConfig::builder().fault(fault).build()).await?;

    let error = client_for(&pump)
        .poll("did-1", LOCALHOST, &pump_model())
        .await
        .expect_err("silent pump should time out");

    assert_matches!(error, jebao::LanError::Timeout { phase: found } if found == phase);
    Ok(())
}

#[tokio::test]
async fn closing_before_the_login_ack_is_reported() -> anyhow::Result<()> {
    let pump = spawn(
        jebao::FakePumpConfig::builder()
            .fault(jebao::FakePumpFault::CloseBeforeLoginAck)
            .build(),
    )
    .await?;

    let error = client_for(&pump)
        .poll("did-1", LOCALHOST, &pump_model())
        .await
        .expect_err("closed connection should fail the poll");

    assert_eq!(Some(jebao::LanPhase::AwaitLoginAck), error.phase());
    Ok(())
}

#[tokio::test]
async fn short_payload_fails_to_decode() -> anyhow::Result<()> {
    let pump = spawn(
        jebao::FakePumpConfig::builder()
            .status_payload(vec![0x03])
            .build(),
    )
    .await?;

    let error = client_for(&pump)
        .poll("did-1", LOCALHOST, &pump_model())
        .await
        .expect_err("one byte cannot hold the speed attribute");

    assert_matches!(error, jebao::LanError::Codec(_));
    Ok(())
}

#[tokio::test]
async fn sequence_numbers_increase_per_device() -> anyhow::Result<()> {
    let pump = spawn(
        jebao::FakePumpConfig::builder()
            .status_payload(vec![0x00, 0x00])
            .build(),
    )
    .await?;
    let client = client_for(&pump);
    let model = pump_model();

    client.poll("did-1", LOCALHOST, &model).await?;
    assert_eq!(Some(1), pump.last_sequence());
    client.poll("did-1", LOCALHOST, &model).await?;
    assert_eq!(Some(2), pump.last_sequence());
    client.poll("did-2", LOCALHOST, &model).await?;
    assert_eq!(Some(1), pump.last_sequence());
    Ok(())
}

#[tokio::test]
async fn overlapping_polls_of_one_device_are_serialised() -> anyhow::Result<()> {
    let pump = spawn(
        jebao::FakePumpConfig::builder()
            .status_payload(vec![0x01, 0x10])
            .status_delay(Duration::from_millis(50))
            .build(),
    )
    .await?;
    let client = client_for(&pump);
    let model = pump_model();

    let (first, second) = tokio::join!(
        client.poll("did-1", LOCALHOST, &model),
        client.poll("did-1", LOCALHOST, &model),
    );
    first?;
    second?;

    assert_eq!(2, pump.connections());
    assert_eq!(1, pump.max_concurrent_connections());
    Ok(())
}
