//! 테이블 스키마 - 레코드 형태와 Arrow 변환
//!
//! 스키마는 테이블 생성 시 임베딩 함수의 차원에 고정되며 이후 변경되지 않습니다.
//! 임베딩 모델을 바꾸려면 새 테이블을 만들어야 합니다.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, StringArray,
};
use arrow_schema::{DataType, Field};

use crate::embedding::EmbeddingFunction;
use crate::error::{Error, Result, StorageError};

/// 행 ID 컬럼 (BM25 인덱스의 rowid와 동일)
pub const ID_FIELD: &str = "id";
/// 원문 텍스트 컬럼
pub const TEXT_FIELD: &str = "text";
/// 벡터 컬럼
pub const VECTOR_FIELD: &str = "vector";

// ============================================================================
// Types
// ============================================================================

/// 저장 레코드
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub text: String,
    pub vector: Vec<f32>,
}

/// 테이블 스키마
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    vector_dim: usize,
    text_field: String,
    vector_field: String,
}

impl Schema {
    /// 차원을 지정하여 생성
    pub fn new(vector_dim: usize) -> Self {
        Self {
            vector_dim,
            text_field: TEXT_FIELD.to_string(),
            vector_field: VECTOR_FIELD.to_string(),
        }
    }

    /// 임베딩 함수의 차원에 바인딩된 스키마
    pub fn for_embedder(embedder: &dyn EmbeddingFunction) -> Self {
        Self::new(embedder.dimensionality())
    }

    pub fn vector_dim(&self) -> usize {
        self.vector_dim
    }

    pub fn text_field(&self) -> &str {
        &self.text_field
    }

    pub fn vector_field(&self) -> &str {
        &self.vector_field
    }

    /// 벡터를 스키마 차원에 맞춤 ("fill" 정책)
    ///
    /// 길이가 다르거나 NaN/무한대가 포함된 벡터는 0 벡터로 대체합니다.
    /// 두 번째 값은 대체 여부입니다.
    pub fn conform(&self, vector: Vec<f32>) -> (Vec<f32>, bool) {
        if vector.len() == self.vector_dim && vector.iter().all(|x| x.is_finite()) {
            (vector, false)
        } else {
            (vec![0.0; self.vector_dim], true)
        }
    }

    fn list_item_field() -> Arc<Field> {
        Arc::new(Field::new("item", DataType::Float32, true))
    }

    /// Arrow 스키마 생성
    pub fn to_arrow(&self) -> arrow_schema::Schema {
        arrow_schema::Schema::new(vec![
            Field::new(ID_FIELD, DataType::Int64, false),
            Field::new(&self.text_field, DataType::Utf8, false),
            Field::new(
                &self.vector_field,
                DataType::FixedSizeList(Self::list_item_field(), self.vector_dim as i32),
                false,
            ),
        ])
    }

    /// 기존 테이블의 Arrow 스키마에서 복원
    pub fn from_arrow(schema: &arrow_schema::Schema) -> Result<Self> {
        let layout = |msg: String| Error::Storage(StorageError::Layout(msg));

        schema
            .field_with_name(ID_FIELD)
            .map_err(|_| layout(format!("missing `{}` column", ID_FIELD)))?;
        schema
            .field_with_name(TEXT_FIELD)
            .map_err(|_| layout(format!("missing `{}` column", TEXT_FIELD)))?;
        let vector = schema
            .field_with_name(VECTOR_FIELD)
            .map_err(|_| layout(format!("missing `{}` column", VECTOR_FIELD)))?;

        match vector.data_type() {
            DataType::FixedSizeList(_, dim) if *dim > 0 => Ok(Self::new(*dim as usize)),
            other => Err(layout(format!(
                "`{}` column must be a fixed size list, found {:?}",
                VECTOR_FIELD, other
            ))),
        }
    }

    /// 레코드들을 RecordBatch로 변환
    ///
    /// # Arguments
    /// * `records` - 스키마 차원에 맞춰진 레코드
    /// * `first_id` - 첫 레코드의 행 ID (이후 1씩 증가)
    pub fn to_batch(&self, records: &[Record], first_id: i64) -> Result<RecordBatch> {
        let ids: Vec<i64> = (0..records.len() as i64).map(|i| first_id + i).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();

        let flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.vector.iter().copied())
            .collect();
        if flat.len() != records.len() * self.vector_dim {
            return Err(Error::Storage(StorageError::Layout(format!(
                "vectors must have {} dimensions",
                self.vector_dim
            ))));
        }

        let vectors = FixedSizeListArray::try_new(
            Self::list_item_field(),
            self.vector_dim as i32,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )?;

        let batch = RecordBatch::try_new(
            Arc::new(self.to_arrow()),
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(vectors),
            ],
        )?;

        Ok(batch)
    }
}

// ============================================================================
// Batch readers
// ============================================================================

/// 쿼리 결과 컬럼 참조
pub(crate) struct BatchColumns<'a> {
    pub ids: &'a Int64Array,
    pub texts: &'a StringArray,
    pub vectors: &'a FixedSizeListArray,
}

impl<'a> BatchColumns<'a> {
    pub(crate) fn from_batch(batch: &'a RecordBatch) -> Result<Self> {
        let missing = |name: &str| Error::Storage(StorageError::Layout(format!("missing {} column", name)));

        let ids = batch
            .column_by_name(ID_FIELD)
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
            .ok_or_else(|| missing(ID_FIELD))?;
        let texts = batch
            .column_by_name(TEXT_FIELD)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| missing(TEXT_FIELD))?;
        let vectors = batch
            .column_by_name(VECTOR_FIELD)
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
            .ok_or_else(|| missing(VECTOR_FIELD))?;

        Ok(Self { ids, texts, vectors })
    }

    /// i번째 행을 (ID, 레코드)로 읽기
    pub(crate) fn row(&self, i: usize) -> Result<(i64, Record)> {
        let values = self.vectors.value(i);
        let floats = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| Error::Storage(StorageError::Layout("vector items must be float32".to_string())))?;

        Ok((
            self.ids.value(i),
            Record {
                text: self.texts.value(i).to_string(),
                vector: floats.values().to_vec(),
            },
        ))
    }
}

/// RecordBatch 목록을 ID -> 레코드 맵으로 변환
pub(crate) fn records_by_id(batches: &[RecordBatch]) -> Result<HashMap<i64, Record>> {
    let mut records = HashMap::new();
    for batch in batches {
        let columns = BatchColumns::from_batch(batch)?;
        for i in 0..batch.num_rows() {
            let (id, record) = columns.row(i)?;
            records.insert(id, record);
        }
    }
    Ok(records)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conform_keeps_valid_vector() {
        let schema = Schema::new(3);
        let (vector, coerced) = schema.conform(vec![0.1, 0.2, 0.3]);
        assert!(!coerced);
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_conform_fills_wrong_length() {
        let schema = Schema::new(4);
        for bad in [vec![1.0, 2.0], vec![1.0; 5], vec![]] {
            let (vector, coerced) = schema.conform(bad);
            assert!(coerced);
            assert_eq!(vector, vec![0.0; 4]);
        }
    }

    #[test]
    fn test_conform_fills_nan() {
        let schema = Schema::new(2);
        let (vector, coerced) = schema.conform(vec![f32::NAN, 1.0]);
        assert!(coerced);
        assert_eq!(vector, vec![0.0, 0.0]);
    }

    #[test]
    fn test_arrow_round_trip_keeps_dimension() {
        let schema = Schema::new(1536);
        let restored = Schema::from_arrow(&schema.to_arrow()).unwrap();
        assert_eq!(restored, schema);
        assert_eq!(restored.text_field(), "text");
        assert_eq!(restored.vector_field(), "vector");
    }

    #[test]
    fn test_from_arrow_rejects_foreign_layout() {
        let foreign = arrow_schema::Schema::new(vec![Field::new("doc_id", DataType::Int64, false)]);
        assert!(matches!(
            Schema::from_arrow(&foreign),
            Err(Error::Storage(StorageError::Layout(_)))
        ));
    }

    #[test]
    fn test_batch_rows() {
        let schema = Schema::new(2);
        let records = vec![
            Record {
                text: "hi I am Harris".to_string(),
                vector: vec![1.0, 0.0],
            },
            Record {
                text: "the hypotenuse".to_string(),
                vector: vec![0.0, 1.0],
            },
        ];

        let batch = schema.to_batch(&records, 10).unwrap();
        assert_eq!(batch.num_rows(), 2);

        let by_id = records_by_id(&[batch]).unwrap();
        assert_eq!(by_id[&10], records[0]);
        assert_eq!(by_id[&11], records[1]);
    }

    #[test]
    fn test_batch_rejects_unconformed_vectors() {
        let schema = Schema::new(3);
        let records = vec![Record {
            text: "x".to_string(),
            vector: vec![1.0],
        }];
        assert!(schema.to_batch(&records, 0).is_err());
    }
}
