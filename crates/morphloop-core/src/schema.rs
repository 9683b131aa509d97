/// Arrow schema for the cycle history table.
pub mod cycles {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, Float64Array, StringArray, UInt32Array, UInt64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::error::ArrowError;
    use arrow::record_batch::RecordBatch;

    use crate::model::CycleSnapshot;
    use crate::target::count_samples;

    /// One row per submitted cycle. Snapshot texts are summarised as line counts.
    pub fn cycle_history_schema() -> Schema {
        Schema::new(vec![
            Field::new("cycle", DataType::UInt32, false),
            Field::new("precision", DataType::Float64, false),
            Field::new("recall", DataType::Float64, false),
            Field::new("f1", DataType::Float64, false),
            Field::new("annotated_count", DataType::UInt64, false),
            Field::new("increment_lines", DataType::UInt64, false),
            Field::new("residual_lines", DataType::UInt64, false),
            Field::new("completed_at", DataType::Utf8, false),
        ])
    }

    /// Build a history batch from snapshots, in the order given.
    pub fn cycle_history_batch(snapshots: &[CycleSnapshot]) -> Result<RecordBatch, ArrowError> {
        let lines = |text: &str| count_samples(text) as u64;
        let columns: Vec<ArrayRef> = vec![
            Arc::new(UInt32Array::from_iter_values(
                snapshots.iter().map(|s| s.cycle),
            )),
            Arc::new(Float64Array::from_iter_values(
                snapshots.iter().map(|s| s.precision),
            )),
            Arc::new(Float64Array::from_iter_values(
                snapshots.iter().map(|s| s.recall),
            )),
            Arc::new(Float64Array::from_iter_values(
                snapshots.iter().map(|s| s.f1),
            )),
            Arc::new(UInt64Array::from_iter_values(
                snapshots.iter().map(|s| s.annotated_count),
            )),
            Arc::new(UInt64Array::from_iter_values(
                snapshots.iter().map(|s| lines(&s.increment_text)),
            )),
            Arc::new(UInt64Array::from_iter_values(
                snapshots.iter().map(|s| lines(&s.residual_text)),
            )),
            Arc::new(StringArray::from_iter_values(
                snapshots.iter().map(|s| s.completed_at.as_str()),
            )),
        ];
        RecordBatch::try_new(Arc::new(cycle_history_schema()), columns)
    }
}

#[cfg(test)]
mod tests {
    use super::cycles;
    use crate::model::CycleSnapshot;

    fn snapshot(cycle: u32, f1: f64) -> CycleSnapshot {
        CycleSnapshot {
            cycle,
            precision: 0.5,
            recall: 0.5,
            f1,
            annotated_count: cycle as u64 * 3,
            increment_text: "c a t\nd o g\nr u n\n".into(),
            residual_text: "s u n\n".into(),
            evaluation_text: "# report\n".into(),
            completed_at: "2026-02-21T10:00:00Z".into(),
        }
    }

    #[test]
    fn cycle_history_schema_has_expected_fields() {
        let schema = cycles::cycle_history_schema();
        assert_eq!(schema.fields().len(), 8);
        assert!(schema.field_with_name("f1").is_ok());
        assert!(schema.field_with_name("residual_lines").is_ok());
    }

    #[test]
    fn history_batch_has_one_row_per_cycle() {
        let batch = cycles::cycle_history_batch(&[snapshot(1, 0.4), snapshot(2, 0.6)]).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 8);
        let increments = batch
            .column_by_name("increment_lines")
            .unwrap()
            .as_any()
            .downcast_ref::<arrow::array::UInt64Array>()
            .unwrap();
        assert_eq!(increments.value(1), 3);
    }

    #[test]
    fn empty_history_is_empty_batch() {
        let batch = cycles::cycle_history_batch(&[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
    }
}
