use serde::de::{Deserialize, Deserializer, Error};
use serde::ser::{Serialize, Serializer};

use crate::Tensor;

#[derive(serde::Serialize)]
#[serde(rename = "Tensor")]
struct TensorRef<'a, T> {
    shape: &'a [usize],
    data: &'a [T],
}

#[derive(serde::Deserialize)]
#[serde(rename = "Tensor", deny_unknown_fields)]
struct OwnedTensor<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Serialize> Serialize for Tensor<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        TensorRef {
            shape: self.shape(),
            data: self.data(),
        }
        .serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Tensor<T> {
    fn deserialize<D>(deserializer: D) -> Result<Tensor<T>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let OwnedTensor { shape, data } = OwnedTensor::deserialize(deserializer)?;
        Tensor::try_from_data(&shape, data)
            .map_err(|_| D::Error::custom("data length does not match shape product"))
    }
}

#[cfg(test)]
mod tests {
    use crate::Tensor;

    #[test]
    fn test_deserialize_serialize() {
        struct Case<'a> {
            json: &'a str,
            expected: Result<Tensor<f32>, String>,
        }

        let cases = [
            Case {
                json: r#"{"data":[]}"#,
                expected: Err("missing field `shape`".to_string()),
            },
            Case {
                json: r#"{"shape":[]}"#,
                expected: Err("missing field `data`".to_string()),
            },
            Case {
                json: r#"{"data": [1.0, 0.5, 2.0, 1.5], "shape": [2, 2]}"#,
                expected: Ok(Tensor::from_data(&[2, 2], vec![1.0, 0.5, 2.0, 1.5])),
            },
            Case {
                json: r#"{"data": [1.0, 0.5, 2.0, 1.5], "shape": [2, 3]}"#,
                expected: Err("data length does not match shape product".to_string()),
            },
        ];

        for Case { json, expected } in cases {
            let actual: Result<Tensor<f32>, String> =
                serde_json::from_str(json).map_err(|e| e.to_string());
            match (actual, expected) {
                (Ok(actual), Ok(expected)) => {
                    assert_eq!(actual, expected);

                    let actual_json = serde_json::to_value(&actual).unwrap();
                    let expected_json: serde_json::Value = serde_json::from_str(json).unwrap();
                    assert_eq!(actual_json, expected_json);
                }
                (Err(actual_err), Err(expected_err)) => assert!(
                    actual_err.contains(&expected_err),
                    "expected \"{}\" to contain \"{}\"",
                    actual_err,
                    expected_err
                ),
                (actual, expected) => assert_eq!(actual, expected),
            }
        }
    }
}
