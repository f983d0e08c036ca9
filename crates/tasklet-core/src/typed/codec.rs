//! PayloadCodec - 引数と戻り値のテキスト表現
//!
//! 値を JSON にしてから base64 にするので、保存形式は text カラムに収まる
//! ASCII 文字列になります。
//!
//! # 設計原則
//! - JSON で表現できない値（NaN, ±inf）は encode 時点で拒否する
//! - 引数なし（`()` / JSON null）は保存しない

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// CodecError は PayloadCodec の変換エラー
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    /// base64 か JSON が壊れている
    #[error("failed to decode payload: {0}")]
    Decode(String),
}

/// PayloadCodec はタスクの引数と戻り値を変換する（状態なし）
///
/// # 使用例
/// ```ignore
/// use tasklet_core::typed::PayloadCodec;
///
/// let text = PayloadCodec::encode(&(1, "a")).unwrap();
/// let back: (i32, String) = PayloadCodec::decode(&text).unwrap();
/// assert_eq!(back, (1, "a".to_string()));
/// ```
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
        ensure_finite(value)?;
        let bytes = serde_json::to_vec(value).map_err(CodecError::Encode)?;
        Ok(STANDARD.encode(bytes))
    }

    /// [`PayloadCodec::encode`] の逆変換
    pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
        let bytes = STANDARD
            .decode(text)
            .map_err(|e| CodecError::Decode(format!("invalid base64: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    /// 呼び出し引数を encode する。引数なし（`()` / JSON null）は `None`
    pub fn encode_params<T: Serialize + ?Sized>(args: &T) -> Result<Option<String>, CodecError> {
        // to_value は NaN を null に潰すので先に検査する
        ensure_finite(args)?;
        let value = serde_json::to_value(args).map_err(CodecError::Encode)?;
        if value.is_null() {
            return Ok(None);
        }
        Self::encode(&value).map(Some)
    }

    /// [`PayloadCodec::encode_params`] の逆変換
    ///
    /// 保存されていない引数は JSON null として decode するので、`()` や
    /// `Option<_>` の引数型はそのまま受け取れる。
    pub fn decode_params<T: DeserializeOwned>(text: Option<&str>) -> Result<T, CodecError> {
        match text {
            Some(text) => Self::decode(text),
            None => serde_json::from_value(serde_json::Value::Null)
                .map_err(|e| CodecError::Decode(e.to_string())),
        }
    }
}

fn ensure_finite<T: Serialize + ?Sized>(value: &T) -> Result<(), CodecError> {
    value.serialize(FiniteCheck).map_err(|NonFinite(msg)| {
        CodecError::Encode(<serde_json::Error as serde::ser::Error>::custom(msg))
    })
}

#[derive(Debug, Error)]
#[error("{0}")]
struct NonFinite(String);

impl serde::ser::Error for NonFinite {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        NonFinite(msg.to_string())
    }
}

/// 値を走査して非有限の浮動小数点数を探す Serializer（何も出力しない）
struct FiniteCheck;

impl FiniteCheck {
    fn float(value: f64) -> Result<(), NonFinite> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(NonFinite(format!("{value} cannot be represented in JSON")))
        }
    }
}

impl serde::Serializer for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_f32(self, v: f32) -> Result<(), NonFinite> {
        Self::float(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<(), NonFinite> {
        Self::float(v)
    }

    fn serialize_bool(self, _: bool) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_i8(self, _: i8) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_i16(self, _: i16) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_i32(self, _: i32) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_i64(self, _: i64) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_i128(self, _: i128) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_u8(self, _: u8) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_u16(self, _: u16) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_u32(self, _: u32) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_u64(self, _: u64) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_u128(self, _: u128) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_char(self, _: char) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_str(self, _: &str) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_bytes(self, _: &[u8]) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_none(self) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<(), NonFinite> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_unit_struct(self, _: &'static str) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
    ) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, NonFinite> {
        Ok(self)
    }
}

impl serde::ser::SerializeSeq for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl serde::ser::SerializeTuple for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl serde::ser::SerializeTupleStruct for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl serde::ser::SerializeTupleVariant for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl serde::ser::SerializeMap for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), NonFinite> {
        key.serialize(FiniteCheck)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl serde::ser::SerializeStruct for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl serde::ser::SerializeStructVariant for FiniteCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}
