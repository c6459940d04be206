//! Typed X-Road actor and service identifiers.
//!
//! Identifiers are immutable value objects compared by structural equality.
//! A service identifier is a member (or subsystem) identifier plus service
//! fields, composed rather than inherited, so the wire element order can be
//! derived mechanically with [`xml_elements`](MemberId::xml_elements).

use crate::error::FormatError;

use std::fmt;

/// Identifiers schema namespace URI.
pub const ID_NS: &str = "http://x-road.eu/xsd/identifiers";

/// Characters never allowed in any identifier part.
const DISALLOWED: &[char] = &['/', '\\', '%', ':', ';'];

/// Value of the `objectType` attribute on identifier elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Member,
    Subsystem,
    Service,
    CentralService,
    Server,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "MEMBER",
            Self::Subsystem => "SUBSYSTEM",
            Self::Service => "SERVICE",
            Self::CentralService => "CENTRALSERVICE",
            Self::Server => "SERVER",
        }
    }

    /// Parse an `objectType` attribute value, case-insensitively.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "MEMBER" => Some(Self::Member),
            "SUBSYSTEM" => Some(Self::Subsystem),
            "SERVICE" => Some(Self::Service),
            "CENTRALSERVICE" => Some(Self::CentralService),
            "SERVER" => Some(Self::Server),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a single identifier part against the X-Road character rules.
pub(crate) fn check_part(field: &'static str, value: &str) -> Result<(), FormatError> {
    if value.trim().is_empty() {
        return Err(FormatError::new(field, "must not be empty"));
    }
    if value
        .chars()
        .any(|c| c.is_control() || DISALLOWED.contains(&c))
    {
        return Err(FormatError::new(
            field,
            format!("\"{value}\" contains characters not allowed in identifiers"),
        ));
    }
    Ok(())
}

/// Identifies an X-Road member or one of its subsystems.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberId {
    xroad_instance: String,
    member_class: String,
    member_code: String,
    subsystem_code: Option<String>,
}

impl MemberId {
    /// A member-level identifier (objectType MEMBER).
    pub fn member(
        xroad_instance: impl Into<String>,
        member_class: impl Into<String>,
        member_code: impl Into<String>,
    ) -> Result<Self, FormatError> {
        let id = Self {
            xroad_instance: xroad_instance.into(),
            member_class: member_class.into(),
            member_code: member_code.into(),
            subsystem_code: None,
        };
        check_part("xRoadInstance", &id.xroad_instance)?;
        check_part("memberClass", &id.member_class)?;
        check_part("memberCode", &id.member_code)?;
        Ok(id)
    }

    /// A subsystem-level identifier (objectType SUBSYSTEM).
    pub fn subsystem(
        xroad_instance: impl Into<String>,
        member_class: impl Into<String>,
        member_code: impl Into<String>,
        subsystem_code: impl Into<String>,
    ) -> Result<Self, FormatError> {
        let mut id = Self::member(xroad_instance, member_class, member_code)?;
        let subsystem = subsystem_code.into();
        check_part("subsystemCode", &subsystem)?;
        id.subsystem_code = Some(subsystem);
        Ok(id)
    }

    pub fn xroad_instance(&self) -> &str {
        &self.xroad_instance
    }

    pub fn member_class(&self) -> &str {
        &self.member_class
    }

    pub fn member_code(&self) -> &str {
        &self.member_code
    }

    pub fn subsystem_code(&self) -> Option<&str> {
        self.subsystem_code.as_deref()
    }

    pub fn object_type(&self) -> ObjectType {
        if self.subsystem_code.is_some() {
            ObjectType::Subsystem
        } else {
            ObjectType::Member
        }
    }

    /// Canonical `(localName, value)` sequence for the wire form.
    pub fn xml_elements(&self) -> Vec<(&'static str, &str)> {
        let mut elements = vec![
            ("xRoadInstance", self.xroad_instance.as_str()),
            ("memberClass", self.member_class.as_str()),
            ("memberCode", self.member_code.as_str()),
        ];
        if let Some(subsystem) = &self.subsystem_code {
            elements.push(("subsystemCode", subsystem.as_str()));
        }
        elements
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.xroad_instance, self.member_class, self.member_code
        )?;
        if let Some(subsystem) = &self.subsystem_code {
            write!(f, "/{subsystem}")?;
        }
        Ok(())
    }
}

/// Who publishes a service: a concrete member, or the central server on
/// behalf of the whole instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServiceOwner {
    Member(MemberId),
    Central { xroad_instance: String },
}

/// Identifies a service or central service offered over X-Road.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId {
    owner: ServiceOwner,
    service_code: String,
    service_version: Option<String>,
}

impl ServiceId {
    /// A service published by a member or subsystem (objectType SERVICE).
    pub fn service(owner: MemberId, service_code: impl Into<String>) -> Result<Self, FormatError> {
        let service_code = service_code.into();
        check_part("serviceCode", &service_code)?;
        Ok(Self {
            owner: ServiceOwner::Member(owner),
            service_code,
            service_version: None,
        })
    }

    /// A central service (objectType CENTRALSERVICE); carries only the
    /// instance and service code.
    pub fn central(
        xroad_instance: impl Into<String>,
        service_code: impl Into<String>,
    ) -> Result<Self, FormatError> {
        let xroad_instance = xroad_instance.into();
        let service_code = service_code.into();
        check_part("xRoadInstance", &xroad_instance)?;
        check_part("serviceCode", &service_code)?;
        Ok(Self {
            owner: ServiceOwner::Central { xroad_instance },
            service_code,
            service_version: None,
        })
    }

    pub fn with_version(mut self, service_version: impl Into<String>) -> Result<Self, FormatError> {
        let version = service_version.into();
        check_part("serviceVersion", &version)?;
        self.service_version = Some(version);
        Ok(self)
    }

    pub fn owner(&self) -> &ServiceOwner {
        &self.owner
    }

    /// The member owning this service, if it is not a central service.
    pub fn owner_member(&self) -> Option<&MemberId> {
        match &self.owner {
            ServiceOwner::Member(member) => Some(member),
            ServiceOwner::Central { .. } => None,
        }
    }

    pub fn xroad_instance(&self) -> &str {
        match &self.owner {
            ServiceOwner::Member(member) => member.xroad_instance(),
            ServiceOwner::Central { xroad_instance } => xroad_instance,
        }
    }

    pub fn service_code(&self) -> &str {
        &self.service_code
    }

    pub fn service_version(&self) -> Option<&str> {
        self.service_version.as_deref()
    }

    pub fn object_type(&self) -> ObjectType {
        match &self.owner {
            ServiceOwner::Member(_) => ObjectType::Service,
            ServiceOwner::Central { .. } => ObjectType::CentralService,
        }
    }

    /// Canonical `(localName, value)` sequence for the wire form.
    pub fn xml_elements(&self) -> Vec<(&'static str, &str)> {
        let mut elements = match &self.owner {
            ServiceOwner::Member(member) => member.xml_elements(),
            ServiceOwner::Central { xroad_instance } => {
                vec![("xRoadInstance", xroad_instance.as_str())]
            }
        };
        elements.push(("serviceCode", self.service_code.as_str()));
        if let Some(version) = &self.service_version {
            elements.push(("serviceVersion", version.as_str()));
        }
        elements
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            ServiceOwner::Member(member) => write!(f, "{member}")?,
            ServiceOwner::Central { xroad_instance } => write!(f, "{xroad_instance}")?,
        }
        write!(f, "/{}", self.service_code)?;
        if let Some(version) = &self.service_version {
            write!(f, "/{version}")?;
        }
        Ok(())
    }
}

/// Identifies the security server routing a message (objectType SERVER).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecurityServerId {
    xroad_instance: String,
    member_class: String,
    member_code: String,
    server_code: String,
}

impl SecurityServerId {
    pub fn server(
        xroad_instance: impl Into<String>,
        member_class: impl Into<String>,
        member_code: impl Into<String>,
        server_code: impl Into<String>,
    ) -> Result<Self, FormatError> {
        let id = Self {
            xroad_instance: xroad_instance.into(),
            member_class: member_class.into(),
            member_code: member_code.into(),
            server_code: server_code.into(),
        };
        check_part("xRoadInstance", &id.xroad_instance)?;
        check_part("memberClass", &id.member_class)?;
        check_part("memberCode", &id.member_code)?;
        check_part("serverCode", &id.server_code)?;
        Ok(id)
    }

    pub fn xroad_instance(&self) -> &str {
        &self.xroad_instance
    }

    pub fn member_class(&self) -> &str {
        &self.member_class
    }

    pub fn member_code(&self) -> &str {
        &self.member_code
    }

    pub fn server_code(&self) -> &str {
        &self.server_code
    }

    pub fn xml_elements(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("xRoadInstance", self.xroad_instance.as_str()),
            ("memberClass", self.member_class.as_str()),
            ("memberCode", self.member_code.as_str()),
            ("serverCode", self.server_code.as_str()),
        ]
    }
}

impl fmt::Display for SecurityServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.xroad_instance, self.member_class, self.member_code, self.server_code
        )
    }
}
