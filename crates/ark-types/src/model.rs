use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// How a resource interacts with the repository: as an RDF container of one
/// of the LDP flavors, or as an opaque binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionModel {
    BasicContainer,
    DirectContainer,
    IndirectContainer,
    NonRdfSource,
}

impl InteractionModel {
    /// The LDP type URI advertised for this model.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::BasicContainer => "http://www.w3.org/ns/ldp#BasicContainer",
            Self::DirectContainer => "http://www.w3.org/ns/ldp#DirectContainer",
            Self::IndirectContainer => "http://www.w3.org/ns/ldp#IndirectContainer",
            Self::NonRdfSource => "http://www.w3.org/ns/ldp#NonRDFSource",
        }
    }

    /// Containers carry RDF content; a non-RDF source carries bytes plus a
    /// sidecar description.
    pub fn is_rdf(&self) -> bool {
        !matches!(self, Self::NonRdfSource)
    }
}

impl fmt::Display for InteractionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BasicContainer => "BasicContainer",
            Self::DirectContainer => "DirectContainer",
            Self::IndirectContainer => "IndirectContainer",
            Self::NonRdfSource => "NonRdfSource",
        };
        f.write_str(name)
    }
}

impl FromStr for InteractionModel {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BasicContainer" => Ok(Self::BasicContainer),
            "DirectContainer" => Ok(Self::DirectContainer),
            "IndirectContainer" => Ok(Self::IndirectContainer),
            "NonRdfSource" => Ok(Self::NonRdfSource),
            other => match other {
                _ if other == Self::BasicContainer.uri() => Ok(Self::BasicContainer),
                _ if other == Self::DirectContainer.uri() => Ok(Self::DirectContainer),
                _ if other == Self::IndirectContainer.uri() => Ok(Self::IndirectContainer),
                _ if other == Self::NonRdfSource.uri() => Ok(Self::NonRdfSource),
                _ => Err(TypeError::UnknownInteractionModel(other.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rdf_classification() {
        assert!(InteractionModel::BasicContainer.is_rdf());
        assert!(InteractionModel::DirectContainer.is_rdf());
        assert!(InteractionModel::IndirectContainer.is_rdf());
        assert!(!InteractionModel::NonRdfSource.is_rdf());
    }

    #[test]
    fn parses_short_name_and_uri() {
        assert_eq!(
            "BasicContainer".parse::<InteractionModel>().unwrap(),
            InteractionModel::BasicContainer
        );
        assert_eq!(
            "http://www.w3.org/ns/ldp#NonRDFSource"
                .parse::<InteractionModel>()
                .unwrap(),
            InteractionModel::NonRdfSource
        );
        assert!(matches!(
            "Widget".parse::<InteractionModel>(),
            Err(TypeError::UnknownInteractionModel(_))
        ));
    }

    #[test]
    fn display_roundtrip() {
        for model in [
            InteractionModel::BasicContainer,
            InteractionModel::DirectContainer,
            InteractionModel::IndirectContainer,
            InteractionModel::NonRdfSource,
        ] {
            let parsed = model.to_string().parse::<InteractionModel>().unwrap();
            assert_eq!(parsed, model);
        }
    }
}
