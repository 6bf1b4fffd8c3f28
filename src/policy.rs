use crate::errors::{AppError, AppResult};
use crate::models::{ContainerRecord, PersistRequest};

const DEFAULT_MAX_ENTITIES: usize = 5_000;

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    max_entities_per_container: usize,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self {
            max_entities_per_container: DEFAULT_MAX_ENTITIES,
        }
    }

    pub fn with_max_entities(max_entities_per_container: usize) -> Self {
        Self {
            max_entities_per_container,
        }
    }

    /// Checks a persisted move against the server's view of the container
    /// and returns the entity's current index.
    pub fn validate_move(
        &self,
        container: &ContainerRecord,
        ordered_ids: &[String],
        request: &PersistRequest,
    ) -> AppResult<usize> {
        if request.client_id.trim().is_empty() {
            return Err(AppError::PermissionDenied(
                "Reorder requests must carry a client id".to_string(),
            ));
        }
        if request.container_id != container.id {
            return Err(AppError::Invalid(format!(
                "Request targets container {} but was routed to {}",
                request.container_id, container.id
            )));
        }
        self.validate_writable(container)?;

        let Some(source_index) = ordered_ids.iter().position(|id| id == &request.entity_id) else {
            return Err(AppError::NotFound(format!(
                "Entity {} is not in container {}",
                request.entity_id, container.id
            )));
        };

        let new_order = request.new_order as usize;
        if new_order >= ordered_ids.len() {
            return Err(AppError::Conflict(format!(
                "Order {} is out of range for {} entities in container {}",
                request.new_order,
                ordered_ids.len(),
                container.id
            )));
        }

        Ok(source_index)
    }

    pub fn validate_insert(&self, container: &ContainerRecord, current_len: usize) -> AppResult<()> {
        self.validate_writable(container)?;
        if current_len >= self.max_entities_per_container {
            return Err(AppError::Conflict(format!(
                "Container {} already holds the maximum of {} entities",
                container.id, self.max_entities_per_container
            )));
        }
        Ok(())
    }

    fn validate_writable(&self, container: &ContainerRecord) -> AppResult<()> {
        if container.archived {
            return Err(AppError::PermissionDenied(format!(
                "Container {} is archived and read-only",
                container.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::PolicyEngine;
    use crate::errors::AppError;
    use crate::models::{ContainerKind, ContainerRecord, PersistRequest};
    use chrono::Utc;

    fn container(archived: bool) -> ContainerRecord {
        ContainerRecord {
            id: "col-1".to_string(),
            kind: ContainerKind::Column,
            archived,
            created_at: Utc::now(),
        }
    }

    fn request(entity_id: &str, new_order: u32) -> PersistRequest {
        PersistRequest {
            request_id: "req-1".to_string(),
            container_id: "col-1".to_string(),
            entity_id: entity_id.to_string(),
            new_order,
            client_id: "client-a".to_string(),
        }
    }

    fn ids() -> Vec<String> {
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }

    #[test]
    fn accepts_valid_move() {
        let index = PolicyEngine::new()
            .validate_move(&container(false), &ids(), &request("b", 0))
            .expect("valid move");
        assert_eq!(index, 1);
    }

    #[test]
    fn archived_container_is_permission_denied() {
        let err = PolicyEngine::new()
            .validate_move(&container(true), &ids(), &request("b", 0))
            .expect_err("archived");
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[test]
    fn unknown_entity_is_not_found() {
        let err = PolicyEngine::new()
            .validate_move(&container(false), &ids(), &request("zzz", 0))
            .expect_err("unknown");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn order_past_end_is_conflict() {
        let err = PolicyEngine::new()
            .validate_move(&container(false), &ids(), &request("a", 3))
            .expect_err("out of range");
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn anonymous_client_is_rejected() {
        let mut anonymous = request("a", 1);
        anonymous.client_id = "  ".to_string();
        let err = PolicyEngine::new()
            .validate_move(&container(false), &ids(), &anonymous)
            .expect_err("anonymous");
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[test]
    fn insert_respects_capacity() {
        let policy = PolicyEngine::with_max_entities(2);
        assert!(policy.validate_insert(&container(false), 1).is_ok());
        assert!(matches!(
            policy.validate_insert(&container(false), 2),
            Err(AppError::Conflict(_))
        ));
    }
}
