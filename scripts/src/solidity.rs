//! Definitions of the Solidity interfaces called during upgrades

use alloy_sol_types::sol;

sol! {
    /// The multi-proxy controller that owns every upgradeable proxy
    #[derive(Debug, PartialEq, Eq)]
    interface IProxyController {
        function addProxy(string memory name, address proxy) external;
        function upgradeProxyTo(uint256 id, address newImpl) external;
        function fetchImplAddress(uint256 id) external view returns (address);
        function fetchProxyAddress(uint256 id) external view returns (address);
        function proxyCount() external view returns (uint256);
        function proxyName(uint256 id) external view returns (string memory);
    }
}

// Declared outside an interface, `impl` is a Rust keyword and cannot name an enum variant
sol! {
    /// Exposed by every upgradeable proxy: the implementation it delegates to
    function impl() external view returns (address);
}

sol! {
    /// Any contract with single-owner access control
    #[derive(Debug, PartialEq, Eq)]
    interface IOwnable {
        function owner() external view returns (address);
        function transferOwnership(address newOwner) external;
    }
}
