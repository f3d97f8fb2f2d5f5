//! Runs a condition sweep into a CSV log and reads it back.

use std::time::Duration;

use xlab_experiment::{read_csv, Conditions, CsvLogger, Experiment, LogPlotter, Value};

#[tokio::test]
async fn sweep_is_logged_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("{}.csv", xlab_experiment::timestamp()));

    let conditions = Conditions::product([("voltage", vec![1.0, 2.0]), ("load", vec![10.0, 20.0])]);
    let data = Experiment::new(xlab_experiment::measure_fn(|m| {
        let v = m.get("voltage").and_then(Value::as_f64).unwrap_or_default();
        let r = m.get("load").and_then(Value::as_f64).unwrap_or_default();
        m.insert("current", v / r);
        m.insert("range", "AUTO");
        Ok(())
    }))
    .with_conditions(conditions)
    .with_logger(CsvLogger::new(&path))
    .with_plotter(LogPlotter::new().with_columns(["current"]))
    .run(Duration::ZERO)
    .await
    .unwrap();

    assert_eq!(data.len(), 4);

    let logged = read_csv(&path).unwrap();
    assert_eq!(logged.columns(), ["time", "voltage", "load", "current", "range"]);
    assert_eq!(logged.column_f64("voltage").unwrap(), vec![1.0, 1.0, 2.0, 2.0]);
    assert_eq!(logged.column_f64("load").unwrap(), vec![10.0, 20.0, 10.0, 20.0]);
    assert_eq!(
        logged.column_f64("current").unwrap(),
        vec![0.1, 0.05, 0.2, 0.1]
    );
    assert_eq!(logged.row(0).unwrap().get("range"), Some(&Value::from("AUTO")));
    assert_eq!(logged.column_f64("time").unwrap(), data.column_f64("time").unwrap());
}

#[tokio::test]
async fn second_run_into_same_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");

    let once = || {
        Experiment::new(xlab_experiment::measure_fn(|m| {
            m.insert("x", 1);
            Ok(())
        }))
        .measurements_per_condition(1)
        .with_logger(CsvLogger::new(&path))
    };

    once().run(Duration::ZERO).await.unwrap();
    assert!(once().run(Duration::ZERO).await.is_err());
    assert_eq!(read_csv(&path).unwrap().len(), 1);
}
