//! Identity strings of real instruments select exactly one driver.

use std::sync::Arc;

use xlab_core::mock::MockInterface;
use xlab_core::scpi::Param;
use xlab_drivers::all_factories;

fn matching(identity: &str) -> Vec<&'static str> {
    all_factories()
        .into_iter()
        .filter(|f| f.matches(identity).unwrap())
        .map(|f| f.driver_type())
        .collect()
}

#[test]
fn identities_select_one_driver() {
    let cases = [
        ("Agilent Technologies,34405A,MY53000123,1.02-1.00", "a34405"),
        ("Agilent Technologies,34450A,MY57000321,00.56-00.73", "a34450"),
        ("Agilent Technologies,34972A,MY49012345,1.17-1.12-02-02", "a34972"),
        ("Agilent Technologies,33220A,MY44012345,2.02-2.02-22-2", "a33xxx"),
        ("*IDN LECROY,HDO6104,LCRY3702N12345,7.6.1", "hdo6xxx"),
        ("*IDN LECROY,WS104,LCRY0001,5.6.1", "ws104"),
        ("USB-ITN", "usb_itn"),
        ("ROHDE&SCHWARZ,SML01,1090.3000.11/123456,2.20", "sml01"),
        ("New PL DC Power Supply", "pl303"),
        ("LD400 Electronic Load", "ld400"),
        ("K8090 8-Channel Relay Card", "k8090"),
    ];

    for (identity, expected) in cases {
        assert_eq!(matching(identity), vec![expected], "{}", identity);
    }
}

#[test]
fn unknown_identity_matches_nothing() {
    assert!(matching("KEITHLEY INSTRUMENTS INC.,MODEL 2000,1,A19").is_empty());
}

#[tokio::test]
async fn factory_builds_multimeter_components() {
    let factory = all_factories()
        .into_iter()
        .find(|f| f.driver_type() == "a34405")
        .unwrap();
    let mock = MockInterface::new("visa", "USB0::0x0957::0x0618::MY53000123::INSTR")
        .with_reply("MEASURE:VOLTAGE:DC? AUTO,DEF", "+1.2345E+00");

    let components = factory.build(Arc::new(mock.clone())).await.unwrap();
    let dmm = components.multimeter.expect("multimeter capability");
    let volts = dmm
        .measure(
            &xlab_core::capabilities::MeasureFunction::VoltageDc,
            Param::Auto,
            Param::Def,
            1,
        )
        .await
        .unwrap();
    assert_eq!(volts, 1.2345);
    assert!(components.readable.is_some());
}
