//! Optional integrations behind feature flags.

#[cfg(feature = "chrono")]
mod chrono_impls {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

    use crate::value::Timestamp;
    use crate::{Decodable, Encodable, Reader, Result, WireError, Writer};

    impl Encodable for DateTime<Utc> {
        fn encode(&self, w: &mut Writer) -> Result<()> {
            w.write_timestamp(Timestamp::new(self.timestamp(), self.timestamp_subsec_nanos()));
            Ok(())
        }
    }

    impl Decodable for DateTime<Utc> {
        fn decode(r: &mut Reader) -> Result<Self> {
            let t = r.read_timestamp()?;
            Utc.timestamp_opt(t.secs, t.nanos)
                .single()
                .ok_or_else(|| WireError::Format("timestamp out of chrono range".into()))
        }
    }

    impl Encodable for NaiveDateTime {
        fn encode(&self, w: &mut Writer) -> Result<()> {
            self.and_utc().encode(w)
        }
    }

    impl Decodable for NaiveDateTime {
        fn decode(r: &mut Reader) -> Result<Self> {
            DateTime::<Utc>::decode(r).map(|d| d.naive_utc())
        }
    }
}
