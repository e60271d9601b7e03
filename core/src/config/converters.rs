use super::*;

/// Value converter for type `String`
pub struct StringValue;
impl ConfigValueType for StringValue {
    type Value = String;

    fn from_conf(conf: &Hocon) -> Result<Self::Value, ConfigError> {
        conf.as_string()
            .ok_or_else(|| ConfigError::expected::<Self::Value>(conf))
    }

    fn config_string(value: Self::Value) -> String {
        format!(r#""{}""#, value)
    }
}

/// Value converter for type `usize`
pub struct UsizeValue;
impl ConfigValueType for UsizeValue {
    type Value = usize;

    fn from_conf(conf: &Hocon) -> Result<Self::Value, ConfigError> {
        let res = conf
            .as_i64()
            .ok_or_else(|| ConfigError::expected::<Self::Value>(conf))?;
        let ures: usize = res.try_into()?;
        Ok(ures)
    }

    fn config_string(value: Self::Value) -> String {
        format!("{}", value)
    }
}

/// Value converter for [DispatchMode](DispatchMode)
pub struct DispatchModeValue;
impl ConfigValueType for DispatchModeValue {
    type Value = DispatchMode;

    fn from_conf(conf: &Hocon) -> Result<Self::Value, ConfigError> {
        let s = StringValue::from_conf(conf)?;
        s.parse().map_err(ConfigError::ConversionError)
    }

    fn config_string(value: Self::Value) -> String {
        format!(r#""{}""#, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::str_conf;

    fn conf_test_roundtrip<T>(value: T::Value)
    where
        T: ConfigValueType,
        T::Value: fmt::Debug + Clone + PartialEq,
    {
        let conf_string = format!("key = {}", T::config_string(value.clone()));
        let conf = str_conf(&conf_string);
        let res = T::from_conf(&conf["key"]).expect("conversion");
        assert_eq!(value, res);
    }

    #[test]
    fn test_string_roundtrip() {
        conf_test_roundtrip::<StringValue>("test".to_string());
    }

    #[test]
    fn test_usize_roundtrip() {
        conf_test_roundtrip::<UsizeValue>(17);
    }

    #[test]
    fn test_modes() {
        for mode in DispatchMode::ALL.iter() {
            conf_test_roundtrip::<DispatchModeValue>(*mode);
        }
    }

    #[test]
    fn test_mode_case_insensitive() {
        let conf = str_conf(r#"mode = "STATIC_ROUND_ROBIN""#);
        let res = DispatchModeValue::from_conf(&conf["mode"]);
        assert_eq!(Ok(DispatchMode::StaticRoundRobin), res);
    }
}
