//! End-to-end: mock backend, registry lookup and driver I/O.

use std::sync::Arc;

use xlab_core::capabilities::{MeasureFunction, WaveShape};
use xlab_core::mock::MockInterface;
use xlab_core::scpi::Param;
use xlab_core::XlabError;
use xlab_hardware::{InstrumentRegistry, MockBackend};

fn bench() -> (MockInterface, MockInterface, InstrumentRegistry) {
    let dmm = MockInterface::new("mock", "USB0::0x0957::0x0618::MY1::INSTR")
        .with_identity("Agilent Technologies,34405A,MY1,1.02")
        .with_reply("MEASURE:RESISTANCE? AUTO,DEF", "+1.00020000E+03");
    let generator = MockInterface::new("mock", "USB0::0x0957::0x0407::MY2::INSTR")
        .with_identity("Agilent Technologies,33220A,MY2,2.02");

    let backend = Arc::new(MockBackend::new().with(dmm.clone()).with(generator.clone()));
    (dmm, generator, InstrumentRegistry::with_mock(backend))
}

#[tokio::test]
async fn find_and_drive_instruments() {
    let (dmm_mock, gen_mock, registry) = bench();

    let dmm = registry.find_instrument("mock:.*0x0618").await.unwrap();
    assert_eq!(dmm.driver_type, "a34405");
    let ohms = dmm
        .components
        .multimeter
        .as_ref()
        .unwrap()
        .measure(&MeasureFunction::Resistance, Param::Auto, Param::Def, 1)
        .await
        .unwrap();
    assert_eq!(ohms, 1000.2);
    assert_eq!(dmm_mock.written(), vec!["MEASURE:RESISTANCE? AUTO,DEF"]);

    let gen = registry.find_instrument("mock:.*0x0407").await.unwrap();
    gen.components
        .function_generator
        .as_ref()
        .unwrap()
        .apply(WaveShape::Square, 1e3, 1.0, 0.0)
        .await
        .unwrap();
    assert_eq!(
        gen_mock.written(),
        vec!["APPLY:SQUARE 1000.000000Hz, 1.000000Vpp, 0.000000"]
    );
}

#[tokio::test]
async fn ambiguous_pattern_lists_candidates() {
    let (_, _, registry) = bench();
    match registry.find_instrument("mock:USB0").await {
        Err(XlabError::MultipleMatches { matches, .. }) => assert_eq!(matches.len(), 2),
        other => panic!("expected MultipleMatches, got {:?}", other),
    }
}
