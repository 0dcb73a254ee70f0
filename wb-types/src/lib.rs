pub mod access;
pub mod supply;

/// `YYYY-MM-DD` calendar dates, the only date format MPStats and the dashboard exchange.
pub mod iso_date {
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};
    use time::format_description::FormatItem;
    use time::macros::format_description;
    use time::Date;

    pub const FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

    pub fn parse(s: &str) -> Result<Date, time::error::Parse> {
        Date::parse(s.trim(), FORMAT)
    }

    pub fn format(date: &Date) -> String {
        date.format(FORMAT).unwrap_or_default()
    }

    pub fn serialize<S: Serializer>(date: &Date, s: S) -> Result<S::Ok, S::Error> {
        let out = date.format(FORMAT).map_err(S::Error::custom)?;
        s.serialize_str(&out)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(de)?;
        parse(&raw).map_err(D::Error::custom)
    }
}
