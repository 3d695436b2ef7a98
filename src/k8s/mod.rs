pub mod labels;
pub mod names;
pub mod service_account;

/// `true` when the API error is a 404 for a missing object.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// `true` for create collisions (409 with reason `AlreadyExists`).
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

/// `true` for resource-version conflicts on update (409 with reason `Conflict`).
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "Conflict")
}
