// std
use std::borrow::Cow;
// crates
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
// internal

/// Serialize any arkworks type through its compressed canonical encoding.
/// Human readable formats get a hex string, binary formats the raw bytes.
pub fn serialize_canonical<T: CanonicalSerialize, S: Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut bytes = Vec::with_capacity(value.compressed_size());
    value
        .serialize_compressed(&mut bytes)
        .map_err(serde::ser::Error::custom)?;
    if serializer.is_human_readable() {
        const_hex::encode(bytes).serialize(serializer)
    } else {
        serializer.serialize_bytes(&bytes)
    }
}

/// Counterpart of [`serialize_canonical`]; decoding validates curve points.
pub fn deserialize_canonical<'de, T: CanonicalDeserialize, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<T, D::Error> {
    let bytes = if deserializer.is_human_readable() {
        let s: Cow<str> = Cow::deserialize(deserializer)?;
        const_hex::decode(s.as_ref()).map_err(D::Error::custom)?
    } else {
        <Vec<u8>>::deserialize(deserializer)?
    };
    T::deserialize_compressed(bytes.as_slice()).map_err(D::Error::custom)
}

pub fn serialize_vec_canonical<T: CanonicalSerialize, S: Serializer>(
    values: &[T],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;
    let mut seq = serializer.serialize_seq(Some(values.len()))?;
    for value in values {
        seq.serialize_element(&CanonicalWrapper(value))?;
    }
    seq.end()
}

pub fn deserialize_vec_canonical<'de, T: CanonicalDeserialize, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<T>, D::Error> {
    let wrapped: Vec<CanonicalOwned<T>> = Vec::deserialize(deserializer)?;
    Ok(wrapped.into_iter().map(|CanonicalOwned(value)| value).collect())
}

struct CanonicalWrapper<'a, T>(&'a T);

impl<T: CanonicalSerialize> Serialize for CanonicalWrapper<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_canonical(self.0, serializer)
    }
}

struct CanonicalOwned<T>(T);

impl<'de, T: CanonicalDeserialize> Deserialize<'de> for CanonicalOwned<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_canonical(deserializer).map(CanonicalOwned)
    }
}

fn serialize_human_readable_bytes_array<const N: usize, S: Serializer>(
    src: [u8; N],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    const_hex::encode(src).serialize(serializer)
}

pub fn serialize_bytes_array<const N: usize, S: Serializer>(
    src: &[u8; N],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
        serialize_human_readable_bytes_array(*src, serializer)
    } else {
        serializer.serialize_bytes(src)
    }
}

fn deserialize_human_readable_bytes_array<'de, const N: usize, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<[u8; N], D::Error> {
    let s: Cow<str> = Cow::deserialize(deserializer)?;
    let mut output = [0u8; N];
    const_hex::decode_to_slice(s.as_ref(), &mut output)
        .map(|_| output)
        .map_err(D::Error::custom)
}

fn deserialize_human_unreadable_bytes_array<'de, const N: usize, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<[u8; N], D::Error> {
    <Vec<u8>>::deserialize(deserializer).and_then(|bytes| {
        if bytes.len() != N {
            Err(D::Error::invalid_length(bytes.len(), &format!("{N}").as_str()))
        } else {
            let mut output = [0u8; N];
            output.copy_from_slice(&bytes);
            Ok(output)
        }
    })
}

pub fn deserialize_bytes_array<'de, const N: usize, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<[u8; N], D::Error> {
    if deserializer.is_human_readable() {
        deserialize_human_readable_bytes_array(deserializer)
    } else {
        deserialize_human_unreadable_bytes_array(deserializer)
    }
}

#[cfg(test)]
mod test {
    use super::{
        deserialize_bytes_array, deserialize_canonical, deserialize_vec_canonical,
        serialize_bytes_array, serialize_canonical, serialize_vec_canonical,
    };
    use ark_bls12_381::{G1Affine, G1Projective};
    use ark_ec::{CurveGroup, Group};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wrapper {
        #[serde(
            serialize_with = "serialize_canonical",
            deserialize_with = "deserialize_canonical"
        )]
        point: G1Affine,
        #[serde(
            serialize_with = "serialize_vec_canonical",
            deserialize_with = "deserialize_vec_canonical"
        )]
        points: Vec<G1Affine>,
        #[serde(
            serialize_with = "serialize_bytes_array",
            deserialize_with = "deserialize_bytes_array"
        )]
        id: [u8; 4],
    }

    #[test]
    fn canonical_json_round_trip() {
        let g = G1Projective::generator();
        let wrapper = Wrapper {
            point: g.into_affine(),
            points: vec![(g + g).into_affine(), (g + g + g).into_affine()],
            id: [0xde, 0xad, 0xbe, 0xef],
        };
        let json = serde_json::to_string(&wrapper).unwrap();
        assert!(json.contains("\"deadbeef\""));
        let decoded: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, wrapper);
    }

    #[test]
    fn reject_invalid_point() {
        let json = format!(
            "{{\"point\":\"{}\",\"points\":[],\"id\":\"00000000\"}}",
            "ff".repeat(48)
        );
        assert!(serde_json::from_str::<Wrapper>(&json).is_err());
    }
}
