use crate::business::BusinessRecord;
use crate::DomainResult;

pub trait BusinessDirectory: Send + Sync {
    fn get_business(
        &self,
        business_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<BusinessRecord>>>;
}
