//! Resource descriptors for the Cloud Control provider
//!
//! One descriptor per supported type: the CloudFormation type name, the
//! status partition, the create-only attributes, and how patiently to poll.
//! The set is handed to the runtime at startup; nothing registers itself.

use std::time::Duration;

use pyxis_core::descriptor::ResourceDescriptor;
use pyxis_core::status::StatusClassifier;

/// NAT gateways routinely take minutes to provision and to release
const NAT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(1200);

/// Descriptors for the resource types this provider supports
pub fn descriptors() -> Vec<ResourceDescriptor> {
    vec![
        ResourceDescriptor::new(
            "vpc",
            "AWS::EC2::VPC",
            StatusClassifier::new(&["available"], &[]),
        )
        .with_replacement_attributes(&["CidrBlock", "Ipv4IpamPoolId", "Ipv4NetmaskLength"]),
        ResourceDescriptor::new(
            "subnet",
            "AWS::EC2::Subnet",
            StatusClassifier::new(&["available"], &[]),
        )
        .with_replacement_attributes(&["VpcId", "CidrBlock", "AvailabilityZone"]),
        ResourceDescriptor::new(
            "internet_gateway",
            "AWS::EC2::InternetGateway",
            StatusClassifier::new(&["available"], &[]),
        ),
        ResourceDescriptor::new(
            "route_table",
            "AWS::EC2::RouteTable",
            StatusClassifier::new(&["available"], &[]),
        )
        .with_replacement_attributes(&["VpcId"]),
        ResourceDescriptor::new(
            "eip",
            "AWS::EC2::EIP",
            StatusClassifier::new(&["available"], &[]),
        )
        .with_replacement_attributes(&["Domain", "NetworkBorderGroup"]),
        ResourceDescriptor::new(
            "nat_gateway",
            "AWS::EC2::NatGateway",
            StatusClassifier::new(&["available"], &["failed"]),
        )
        .with_replacement_attributes(&["SubnetId", "AllocationId", "ConnectivityType"])
        .with_timeouts(NAT_GATEWAY_TIMEOUT, NAT_GATEWAY_TIMEOUT, NAT_GATEWAY_TIMEOUT)
        .with_poll_interval(Duration::from_secs(10)),
        ResourceDescriptor::new(
            "security_group",
            "AWS::EC2::SecurityGroup",
            StatusClassifier::new(&["available"], &[]),
        )
        .with_replacement_attributes(&["VpcId", "GroupName", "GroupDescription"]),
    ]
}

#[cfg(test)]
mod tests {
    use pyxis_core::descriptor::Registry;
    use pyxis_core::status::StatusClass;

    use super::*;

    #[test]
    fn descriptor_type_names_are_unique() {
        let all = descriptors();
        let mut names: Vec<&str> = all.iter().map(|d| d.type_name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), all.len());
    }

    #[test]
    fn registry_resolves_every_descriptor() {
        let registry = Registry::new(descriptors());
        for name in ["vpc", "subnet", "nat_gateway", "security_group"] {
            assert!(registry.get(name).is_some(), "missing descriptor: {}", name);
        }
        assert!(registry.get("dns_zone").is_none());
    }

    #[test]
    fn nat_gateway_statuses_partition() {
        let registry = Registry::new(descriptors());
        let nat = registry.get("nat_gateway").unwrap();
        assert_eq!(nat.statuses.classify("available"), StatusClass::Success);
        assert_eq!(nat.statuses.classify("failed"), StatusClass::Failure);
        assert_eq!(nat.statuses.classify("pending"), StatusClass::Transient);
        assert_eq!(nat.statuses.classify("deleting"), StatusClass::Transient);
    }

    #[test]
    fn nat_gateway_waits_longer_than_default() {
        let registry = Registry::new(descriptors());
        let nat = registry.get("nat_gateway").unwrap();
        let vpc = registry.get("vpc").unwrap();
        assert!(nat.create_timeout > vpc.create_timeout);
        assert!(nat.poll_interval > vpc.poll_interval);
    }
}
