use crate::error::ParamError;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// 可以出现在参数记录中的字段值。
///
/// `Raw`是参数文件中的原始表示；枚举值在文件中既可以是整数编码也可以是名称，
/// 因此需要在反序列化之后再单独解析，以区分值错误和查找错误。
pub trait ParamValue: Sized + Copy {
    type Raw: DeserializeOwned;

    fn resolve(raw: Self::Raw) -> Result<Self, ParamError>;

    /// 渲染为外部程序命令行中的取值。
    fn to_arg(&self) -> String;
}

impl ParamValue for u32 {
    type Raw = u32;

    #[inline]
    fn resolve(raw: u32) -> Result<Self, ParamError> {
        Ok(raw)
    }

    #[inline]
    fn to_arg(&self) -> String {
        self.to_string()
    }
}

impl ParamValue for f64 {
    type Raw = f64;

    #[inline]
    fn resolve(raw: f64) -> Result<Self, ParamError> {
        Ok(raw)
    }

    #[inline]
    fn to_arg(&self) -> String {
        format_real(*self)
    }
}

/// 以最短可往返形式输出实数，与Python的`repr(float)`一致：
/// 十进制指数在`[-4, 16)`内用定点形式且整数值保留`.0`（`3.0`、`0.01`），
/// 其余用科学计数法且指数至少两位（`1e-05`、`1.5e+16`）。
pub fn format_real(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let sci = format!("{v:e}");
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if (-4..16).contains(&exp) {
        let fixed = format!("{v}");
        if fixed.contains('.') {
            fixed
        } else {
            fixed + ".0"
        }
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    }
}

/// 枚举字段在参数文件中的原始取值。
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum CodeOrName {
    Code(i64),
    Name(String),
}

/// 规范化枚举名称：去除首尾空白，空格与连字符替换为下划线，并转为大写。
pub fn normalize_name(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

macro_rules! code_enum {
    (
        $(#[$meta:meta])*
        $name:ident : $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident = $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// 外部程序使用的整数编码。
            #[inline]
            pub fn code(self) -> i64 {
                self as i64
            }

            /// 规范（大写）名称。
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            /// 按名称查找，名称大小写不敏感，空格与连字符视为下划线。
            pub fn from_name(s: &str) -> ::std::result::Result<Self, $crate::error::ParamError> {
                let normalized = $crate::params::value::normalize_name(s);
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.name() == normalized)
                    .ok_or_else(|| $crate::error::ParamError::UnknownName {
                        kind: $kind,
                        name: s.to_string(),
                    })
            }
        }

        impl TryFrom<i64> for $name {
            type Error = $crate::error::ParamError;

            fn try_from(code: i64) -> ::std::result::Result<Self, Self::Error> {
                usize::try_from(code)
                    .ok()
                    .and_then(|i| Self::ALL.get(i).copied())
                    .ok_or($crate::error::ParamError::InvalidCode { kind: $kind, code })
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::ParamError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.trim().parse::<i64>() {
                    Ok(code) => Self::try_from(code),
                    Err(_) => Self::from_name(s),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.name())
            }
        }

        impl $crate::params::value::ParamValue for $name {
            type Raw = $crate::params::value::CodeOrName;

            fn resolve(raw: Self::Raw) -> ::std::result::Result<Self, $crate::error::ParamError> {
                match raw {
                    $crate::params::value::CodeOrName::Code(code) => Self::try_from(code),
                    $crate::params::value::CodeOrName::Name(name) => name.parse(),
                }
            }

            #[inline]
            fn to_arg(&self) -> String {
                self.code().to_string()
            }
        }
    };
}

pub(crate) use code_enum;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_formatting_follows_python_repr() {
        assert_eq!(format_real(3.0), "3.0");
        assert_eq!(format_real(0.0), "0.0");
        assert_eq!(format_real(0.01), "0.01");
        assert_eq!(format_real(-0.5), "-0.5");
        assert_eq!(format_real(-1.0 / 3.0), "-0.3333333333333333");
        assert_eq!(format_real(180.0), "180.0");
        assert_eq!(format_real(-0.0), "-0.0");
        assert_eq!(format_real(0.0001), "0.0001");
        assert_eq!(format_real(1e-5), "1e-05");
        assert_eq!(format_real(-2.5e-7), "-2.5e-07");
        assert_eq!(format_real(1e16), "1e+16");
        assert_eq!(format_real(1.5e300), "1.5e+300");
        assert_eq!(format_real(123456789012345.0), "123456789012345.0");
        assert_eq!(format_real(f64::INFINITY), "inf");
    }

    #[test]
    fn names_are_normalized() {
        assert_eq!(normalize_name(" squared correlation-coefficient "), "SQUARED_CORRELATION_COEFFICIENT");
        assert_eq!(normalize_name("M_SMOOTHER"), "M_SMOOTHER");
    }
}
