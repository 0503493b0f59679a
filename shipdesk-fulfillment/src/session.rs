use uuid::Uuid;
use shipdesk_core::{Fulfillment, LineItemSelection, Order, PackageDescriptor, Rate};

use crate::error::{FulfillmentResult, ValidationError};
use crate::orchestrator::{CreateFulfillmentRequest, ManualTracking};
use crate::planner::FulfillmentPlanner;

/// One operator's in-progress shipment for an order: planned quantities,
/// package, and the chosen way of shipping it.
#[derive(Debug, Clone)]
pub struct ShipmentSession {
    planner: FulfillmentPlanner,
    package: PackageDescriptor,
    rate: Option<Rate>,
    manual_tracking: Option<ManualTracking>,
    no_notification: bool,
    submitting: bool,
}

impl ShipmentSession {
    pub fn open(order: &Order, package: PackageDescriptor) -> Self {
        Self {
            planner: FulfillmentPlanner::open(order),
            package,
            rate: None,
            manual_tracking: None,
            no_notification: false,
            submitting: false,
        }
    }

    pub fn order_id(&self) -> Uuid {
        self.planner.order_id()
    }

    pub fn planner(&self) -> &FulfillmentPlanner {
        &self.planner
    }

    pub fn set_quantity(&mut self, line_item_id: Uuid, qty: i32) -> Result<(), ValidationError> {
        self.planner.set_quantity(line_item_id, qty)
    }

    pub fn package(&self) -> &PackageDescriptor {
        &self.package
    }

    /// Rates belong to the package they were quoted for, so a new package
    /// drops the selected rate.
    pub fn set_package(&mut self, package: PackageDescriptor) {
        if package != self.package {
            self.package = package;
            self.rate = None;
        }
    }

    pub fn select_rate(&mut self, rate: Rate) {
        self.manual_tracking = None;
        self.rate = Some(rate);
    }

    pub fn selected_rate(&self) -> Option<&Rate> {
        self.rate.as_ref()
    }

    pub fn use_manual_tracking(&mut self, manual: ManualTracking) {
        self.rate = None;
        self.manual_tracking = Some(manual);
    }

    pub fn set_no_notification(&mut self, no_notification: bool) {
        self.no_notification = no_notification;
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    /// Whether "create shipment" is enabled
    pub fn can_submit(&self) -> bool {
        !self.submitting && self.to_request().is_ok()
    }

    pub fn to_request(&self) -> Result<CreateFulfillmentRequest, ValidationError> {
        let request = CreateFulfillmentRequest {
            order_id: self.planner.order_id(),
            selections: self.planner.selections(),
            rate: self.rate.clone(),
            manual_tracking: self.manual_tracking.clone(),
            package: self.package,
            no_notification: self.no_notification,
        };
        request.validate()?;
        Ok(request)
    }

    /// Lock the session for one submission
    pub fn begin_submit(&mut self) -> Result<CreateFulfillmentRequest, ValidationError> {
        if self.submitting {
            return Err(ValidationError::SubmissionInFlight);
        }
        let request = self.to_request()?;
        self.submitting = true;
        Ok(request)
    }

    /// Unlock after a submission. On success the selections are cleared and
    /// remaining quantities re-derived from `order`, the fresh snapshot.
    pub fn finish_submit(&mut self, outcome: &FulfillmentResult<Fulfillment>, order: &Order) {
        self.submitting = false;
        self.planner.rebase(order);
        if outcome.is_ok() {
            self.planner.clear();
            self.rate = None;
            self.manual_tracking = None;
        }
    }

    /// Unlock without touching selections, for when no fresh order is at hand
    pub fn abort_submit(&mut self) {
        self.submitting = false;
    }

    pub fn selections(&self) -> Vec<LineItemSelection> {
        self.planner.selections()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FulfillmentError;
    use crate::testing::package;
    use shipdesk_core::LineItem;

    fn order(ordered: i32) -> (Order, Uuid) {
        let mut order = Order::new("#1002", vec![]);
        let item = LineItem::new(order.id, "Teapot", None, ordered);
        let id = item.id;
        order.line_items.push(item);
        (order, id)
    }

    fn rate(price: i64) -> Rate {
        Rate {
            id: format!("r-{}", price),
            provider_id: Uuid::new_v4(),
            carrier: "Acme Parcel".to_string(),
            service: "ground".to_string(),
            price_minor: price,
            currency: "USD".to_string(),
            estimated_days: Some(4),
        }
    }

    #[test]
    fn test_submit_requires_rate_and_selection() {
        let (order, id) = order(3);
        let mut session = ShipmentSession::open(&order, package(1.0));
        assert!(!session.can_submit());

        session.select_rate(rate(999));
        assert!(session.can_submit());

        session.set_quantity(id, 0).unwrap();
        assert!(!session.can_submit());
        assert_eq!(session.to_request().unwrap_err(), ValidationError::NothingToShip);
    }

    #[test]
    fn test_double_submit_is_refused() {
        let (order, _) = order(3);
        let mut session = ShipmentSession::open(&order, package(1.0));
        session.select_rate(rate(999));

        session.begin_submit().unwrap();
        assert!(!session.can_submit());
        assert_eq!(session.begin_submit().unwrap_err(), ValidationError::SubmissionInFlight);
    }

    #[test]
    fn test_success_clears_selections() {
        let (mut order, id) = order(10);
        let mut session = ShipmentSession::open(&order, package(1.0));
        session.select_rate(rate(999));
        session.set_quantity(id, 6).unwrap();
        let request = session.begin_submit().unwrap();

        let fulfillment = Fulfillment::new(order.id, &request.selections, vec![]);
        order.fulfillments.push(fulfillment.clone());
        session.finish_submit(&Ok(fulfillment), &order);

        assert!(!session.is_submitting());
        assert!(session.selections().is_empty());
        assert!(session.selected_rate().is_none());
        assert_eq!(session.planner().remaining_unfulfilled(&id), 4);
    }

    #[test]
    fn test_failure_keeps_selections_for_retry() {
        let (order, id) = order(10);
        let mut session = ShipmentSession::open(&order, package(1.0));
        session.select_rate(rate(999));
        session.set_quantity(id, 6).unwrap();
        session.begin_submit().unwrap();

        session.finish_submit(&Err(FulfillmentError::Persistence("disk full".to_string())), &order);
        assert!(session.can_submit());
        assert_eq!(session.planner().quantity(&id), Some(6));
    }

    #[test]
    fn test_package_change_drops_rate() {
        let (order, _) = order(2);
        let mut session = ShipmentSession::open(&order, package(1.0));
        session.select_rate(rate(999));
        session.set_package(package(1.0));
        assert!(session.selected_rate().is_some());
        session.set_package(package(2.5));
        assert!(session.selected_rate().is_none());
    }

    #[test]
    fn test_rate_and_manual_tracking_are_exclusive() {
        let (order, _) = order(2);
        let mut session = ShipmentSession::open(&order, package(1.0));
        session.select_rate(rate(999));
        session.use_manual_tracking(ManualTracking {
            carrier: "Courier".to_string(),
            tracking_number: "C-1".to_string(),
            tracking_url: None,
        });
        let request = session.to_request().unwrap();
        assert!(request.rate.is_none());
        assert!(request.manual_tracking.is_some());
    }
}
