use crate::record::{Column, RecordId};

// Redact every value of the column.
pub fn mask(column: &Column) -> Vec<RecordId> {
    column.entries.iter().map(|(id, _)| *id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;

    #[test]
    fn test_mask() {
        let column = Column::new(
            "name",
            vec![
                (RecordId(2), Value::Text("Linda".into())),
                (RecordId(5), Value::Text("Max".into())),
            ],
        );
        assert_eq!(mask(&column), vec![RecordId(2), RecordId(5)]);
        assert!(mask(&Column::new("name", vec![])).is_empty());
    }
}
