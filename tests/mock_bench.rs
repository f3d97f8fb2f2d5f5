//! A simulated bench: a DMM read under a sweep of generator settings,
//! logged to CSV.

use std::sync::Arc;
use std::time::Duration;

use xlab::common::mock::MockInterface;
use xlab::hardware::MockBackend;
use xlab::prelude::*;

const DMM_ID: &str = "Agilent Technologies,34405A,MY1,1.0";
const GEN_ID: &str = "Agilent Technologies,33220A,MY2,2.0";

#[tokio::test]
async fn sweep_generator_and_log_dmm() {
    let dmm_mock = MockInterface::new("mock", "USB0::34405A::INSTR")
        .with_identity(DMM_ID)
        .with_reply("MEASURE:VOLTAGE:DC? AUTO,DEF", "+5.0E-01");
    let gen_mock = MockInterface::new("mock", "USB0::33220A::INSTR").with_identity(GEN_ID);
    let backend = MockBackend::new()
        .with(dmm_mock.clone())
        .with(gen_mock.clone());
    let registry = InstrumentRegistry::with_mock(Arc::new(backend));

    let dmm = registry
        .find_instrument("mock:.*34405A")
        .await
        .unwrap()
        .components
        .readable
        .unwrap();
    let generator = registry
        .find_instrument("mock:.*33220A")
        .await
        .unwrap()
        .components
        .function_generator
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.csv");

    let generator_for_apply = generator.clone();
    let data = Experiment::new(ReadableMeasure::new("dmm", dmm))
        .with_conditions(Conditions::zip([("frequency", vec![100.0, 1000.0])]).unwrap())
        .with_apply_condition(ApplyFrequency(generator_for_apply))
        .with_logger(CsvLogger::new(&path))
        .run(Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(data.columns(), ["time", "frequency", "dmm"]);
    assert_eq!(data.column_f64("dmm").unwrap(), vec![0.5, 0.5]);
    assert_eq!(
        gen_mock.written(),
        vec!["FREQUENCY 100", "FREQUENCY 1000"]
    );
    assert_eq!(read_csv(&path).unwrap(), data);
}

struct ApplyFrequency(Arc<dyn FunctionGenerator>);

#[async_trait::async_trait]
impl xlab::experiment::ApplyCondition for ApplyFrequency {
    async fn apply(&self, condition: &Measurement) -> anyhow::Result<()> {
        let hz = condition
            .get("frequency")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow::anyhow!("no frequency"))?;
        self.0.set_frequency(Param::Value(hz)).await?;
        Ok(())
    }
}
