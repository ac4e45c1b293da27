//! Fast-transfer gateway contract bindings (EVM side).

use alloy::sol;

/// Source-chain order status as reported by `orderStatuses`.
pub const GATEWAY_ORDER_UNFILLED: u8 = 0;
/// The order was settled and the escrow paid out to the filler.
pub const GATEWAY_ORDER_FILLED: u8 = 1;
/// The order timed out and the escrow was refunded to the sender.
pub const GATEWAY_ORDER_REFUNDED: u8 = 2;

sol! {
    #[sol(rpc)]
    interface IFastTransferGateway {
        /// Emitted when a user escrows funds for a new order.
        event OrderSubmitted(bytes32 indexed orderID, bytes order);

        /// Emitted when an expired order's escrow is returned to the sender.
        event OrderRefunded(bytes32 indexed orderID);

        /// Public order book; zero amount means the order is unknown.
        function orders(bytes32 orderID) external view returns (uint256 amountIn);

        /// Source-chain lifecycle of the order (0 = unfilled).
        function orderStatuses(bytes32 orderID) external view returns (uint8);

        /// True once the settlement for the order paid out to the filler.
        function settled(bytes32 orderID) external view returns (bool);

        /// Pays `amountOut` to the recipient on the destination chain.
        function fillOrder(bytes32 orderID, bytes calldata order) external;

        /// Starts the refund flow for an expired unfilled order.
        function initiateTimeout(bytes calldata order) external;
    }
}
