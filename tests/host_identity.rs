// Windows-only check that the process account is offered as default owner
#![cfg(windows)]
#![allow(clippy::unwrap_used, reason = "Unwrap is not an issue in tests")]

use ntfs_usermap::SecurityApi;
use ntfs_usermap::volume::HostApi;

#[test]
fn current_account_is_known() {
    let identity = HostApi::default().default_identity().unwrap();
    assert!(!identity.account.name.is_empty(), "account without a name");
    assert!(identity.sid.as_str().starts_with("S-1-"), "{}", identity.sid);
    let round_trip = ntfs_usermap::SecurityIdentifier::from_bytes(identity.sid.as_bytes()).unwrap();
    assert_eq!(round_trip, identity.sid);
}
