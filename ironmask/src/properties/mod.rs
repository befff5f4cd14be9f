//! Property drivers: each security notion reduces to a run of the
//! constructive enumerator + expander (random-probing family) or of the
//! rules-based exhaustive engine (probing family), possibly per fault
//! scenario.

pub mod card_rpc;
pub mod faults;
pub mod random_probing;

use std::str::FromStr;

use anyhow::bail;

use crate::rules::ProbingProperty;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Property {
    Ni,
    Sni,
    FreeSni,
    Ios,
    Pini,
    Rp,
    Rpc,
    Rpe,
    CardRpc,
    Cni,
    Crp,
    Crpc,
}

impl Property {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ni => "NI",
            Self::Sni => "SNI",
            Self::FreeSni => "freeSNI",
            Self::Ios => "IOS",
            Self::Pini => "PINI",
            Self::Rp => "RP",
            Self::Rpc => "RPC",
            Self::Rpe => "RPE",
            Self::CardRpc => "cardRPC",
            Self::Cni => "CNI",
            Self::Crp => "CRP",
            Self::Crpc => "CRPC",
        }
    }

    /// Properties that need the `-t` threshold.
    pub fn requires_t(&self) -> bool {
        matches!(
            self,
            Self::Ni
                | Self::Sni
                | Self::FreeSni
                | Self::Ios
                | Self::Pini
                | Self::Rpc
                | Self::Rpe
                | Self::Cni
                | Self::Crpc
        )
    }

    /// Properties that need the `-k` fault-count parameter.
    pub fn requires_k(&self) -> bool {
        matches!(self, Self::Cni | Self::Crp | Self::Crpc)
    }

    pub fn probing(&self) -> Option<ProbingProperty> {
        match self {
            Self::Ni => Some(ProbingProperty::Ni),
            Self::Sni => Some(ProbingProperty::Sni),
            Self::FreeSni => Some(ProbingProperty::FreeSni),
            Self::Ios => Some(ProbingProperty::Ios),
            Self::Pini => Some(ProbingProperty::Pini),
            _ => None,
        }
    }
}

impl FromStr for Property {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NI" => Self::Ni,
            "SNI" => Self::Sni,
            "freeSNI" => Self::FreeSni,
            "IOS" => Self::Ios,
            "PINI" => Self::Pini,
            "RP" => Self::Rp,
            "RPC" => Self::Rpc,
            "RPE" => Self::Rpe,
            "cardRPC" => Self::CardRpc,
            "CNI" => Self::Cni,
            "CRP" => Self::Crp,
            "CRPC" => Self::Crpc,
            other => bail!(
                "unknown property '{other}' \
                 (expected NI|SNI|freeSNI|IOS|PINI|RP|RPC|RPE|cardRPC|CNI|CRP|CRPC)"
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_parsing() {
        assert_eq!("RP".parse::<Property>().unwrap(), Property::Rp);
        assert_eq!("freeSNI".parse::<Property>().unwrap(), Property::FreeSni);
        assert_eq!("cardRPC".parse::<Property>().unwrap(), Property::CardRpc);
        assert!("rp".parse::<Property>().is_err());
        assert!("foo".parse::<Property>().is_err());
    }

    #[test]
    fn test_mandatory_arguments() {
        assert!(Property::Sni.requires_t());
        assert!(!Property::Rp.requires_t());
        assert!(Property::Crp.requires_k());
        assert!(!Property::Rpc.requires_k());
    }
}
